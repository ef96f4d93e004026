// Name resolution for organizations, spaces and applications

use crate::error::{ClientError, Result};
use crate::executor::RequestExecutor;
use crate::models::resources::{ApplicationEntity, OrganizationEntity, SpaceEntity};
use crate::models::{CloudApplication, CloudOrganization, CloudSpace};
use crate::request::builders;

/// Resolves human names to controller resources
///
/// Resolution pipeline for a space:
/// 1. Look up the organization by name
/// 2. Look up the space by name inside that organization
/// 3. Attach the organization to the space
pub struct SpaceResolver<'a> {
    executor: &'a RequestExecutor,
}

impl<'a> SpaceResolver<'a> {
    pub fn new(executor: &'a RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn organization(&self, name: &str) -> Result<CloudOrganization> {
        let descriptor = builders::organization_by_name(name);
        let resources = self.executor.fetch_all::<OrganizationEntity>(&descriptor)?;

        resources
            .into_iter()
            .map(CloudOrganization::from)
            .find(|org| org.name == name)
            .ok_or_else(|| not_found(descriptor.operation(), "Organization", name))
    }

    pub fn space(&self, organization: &CloudOrganization, name: &str) -> Result<CloudSpace> {
        let descriptor = builders::space_by_name(&organization.guid, name);
        let resources = self.executor.fetch_all::<SpaceEntity>(&descriptor)?;

        let space = resources
            .into_iter()
            .map(CloudSpace::from)
            .find(|space| space.name == name)
            .ok_or_else(|| {
                not_found(
                    descriptor.operation(),
                    "Space",
                    &format!("{} in organization {}", name, organization.name),
                )
            })?;

        tracing::debug!(
            organization = %organization.name,
            space = %space.name,
            space_guid = %space.guid,
            "Resolved space"
        );
        Ok(space.in_organization(organization.clone()))
    }

    /// Organization and space by name in one go
    pub fn resolve(&self, organization: &str, space: &str) -> Result<CloudSpace> {
        let organization = self.organization(organization)?;
        self.space(&organization, space)
    }

    /// Application by name in the current target space
    pub fn application(&self, name: &str) -> Result<CloudApplication> {
        let descriptor = builders::application_by_name(name);
        let resources = self.executor.fetch_all::<ApplicationEntity>(&descriptor)?;

        resources
            .into_iter()
            .map(CloudApplication::from)
            .find(|app| app.name == name)
            .ok_or_else(|| not_found(descriptor.operation(), "Application", name))
    }
}

fn not_found(operation: String, kind: &str, name: &str) -> ClientError {
    ClientError::NotFound {
        operation,
        message: format!("{} {} not found", kind, name),
    }
}
