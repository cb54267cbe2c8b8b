//! Cluster access for gang resources.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::error::GangError;

pub const FIELD_MANAGER: &str = "gml-operator";

/// Namespaced get/create/replace against the backend's gang resource.
///
/// Implementations report optimistic-concurrency failures as
/// [`GangError::Conflict`] and create races as [`GangError::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GangClient: Send + Sync {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, GangError>;

    async fn create(
        &self,
        api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError>;

    /// Replace the object; its resourceVersion must match the live one.
    async fn replace(
        &self,
        api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError>;
}

pub struct KubeGangClient {
    client: Client,
}

impl KubeGangClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, api)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GangClient for KubeGangClient {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, GangError> {
        Ok(self.api(api, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError> {
        match self.api(api, namespace).create(&Self::post_params(), object).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(GangError::AlreadyExists {
                name: object.name_any(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(
        &self,
        api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError> {
        let name = object.name_any();
        match self
            .api(api, namespace)
            .replace(&name, &Self::post_params(), object)
            .await
        {
            Ok(replaced) => Ok(replaced),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(GangError::Conflict { name }),
            Err(e) => Err(e.into()),
        }
    }
}
