//! Per-operation ownership declarations and identifier extraction.

use serde_json::Value;

use super::catalog::{CatalogError, ResourceType, Selector};
use super::evaluator::{Decision, OwnershipEvaluator};
use super::principal::Principal;

/// Where the declared identifier lives in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdLocation {
    #[default]
    Path,
    Body,
}

/// Static ownership requirement attached to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedResource {
    pub resource_type: ResourceType,
    pub id_param: String,
    pub location: IdLocation,
    pub selector: Option<Selector>,
}

impl OwnedResource {
    pub fn new(resource_type: ResourceType, id_param: impl Into<String>) -> Self {
        Self {
            resource_type,
            id_param: id_param.into(),
            location: IdLocation::Path,
            selector: None,
        }
    }

    /// Builds a declaration from string tags, rejecting unknown ones up front.
    pub fn parse(
        resource_type: &str,
        id_param: impl Into<String>,
        location: IdLocation,
        selector: Option<&str>,
    ) -> Result<Self, CatalogError> {
        let mut declaration = Self::new(resource_type.parse()?, id_param);
        declaration.location = location;
        declaration.selector = selector.map(str::parse).transpose()?;
        Ok(declaration)
    }

    /// Reads the identifier as the id of `selector`'s entity instead.
    pub fn by(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn from_body(mut self) -> Self {
        self.location = IdLocation::Body;
        self
    }

    /// Pulls the raw identifier out of the request. Strings and numbers are
    /// accepted from a JSON body; anything else counts as absent.
    pub fn extract_id(&self, request: &RequestView<'_>) -> Option<String> {
        match self.location {
            IdLocation::Path => request
                .path_params
                .iter()
                .find(|(name, _)| *name == self.id_param)
                .map(|(_, value)| value.to_string()),
            IdLocation::Body => match request.body?.get(&self.id_param)? {
                Value::String(value) => Some(value.clone()),
                Value::Number(value) => Some(value.to_string()),
                _ => None,
            },
        }
    }

    /// Runs the ownership check this declaration describes against a request.
    pub async fn authorize<E>(&self, evaluator: &E, principal: &Principal, request: &RequestView<'_>) -> Decision
    where
        E: OwnershipEvaluator + ?Sized,
    {
        let raw_id = self.extract_id(request);
        evaluator
            .authorize(principal, self.resource_type, raw_id.as_deref(), self.selector)
            .await
    }
}

/// The parts of a live request an ownership check can read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestView<'a> {
    pub path_params: &'a [(&'a str, &'a str)],
    pub body: Option<&'a Value>,
}

impl<'a> RequestView<'a> {
    pub fn new(path_params: &'a [(&'a str, &'a str)], body: Option<&'a Value>) -> Self {
        Self { path_params, body }
    }
}
