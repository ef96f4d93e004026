use serde::{Deserialize, Serialize};

// ==================================================================================================
// v2 envelopes
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub guid: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<T> {
    pub metadata: Metadata,
    pub entity: T,
}

/// One page of a v2 listing
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub next_url: Option<String>,
    pub resources: Vec<Resource<T>>,
}

// ==================================================================================================
// Entities
// ==================================================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationEntity {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceEntity {
    pub name: String,
    #[serde(default)]
    pub organization_guid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationEntity {
    pub name: String,
    #[serde(default)]
    pub space_guid: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub instances: Option<u32>,
    #[serde(default)]
    pub memory: Option<u32>,
}

// ==================================================================================================
// Domain records
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudOrganization {
    pub guid: String,
    pub name: String,
}

impl CloudOrganization {
    pub fn new(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
        }
    }
}

impl From<Resource<OrganizationEntity>> for CloudOrganization {
    fn from(resource: Resource<OrganizationEntity>) -> Self {
        Self {
            guid: resource.metadata.guid,
            name: resource.entity.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSpace {
    pub guid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<CloudOrganization>,
}

impl CloudSpace {
    pub fn new(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            organization: None,
        }
    }

    pub fn in_organization(mut self, organization: CloudOrganization) -> Self {
        self.organization = Some(organization);
        self
    }
}

impl From<Resource<SpaceEntity>> for CloudSpace {
    fn from(resource: Resource<SpaceEntity>) -> Self {
        Self {
            guid: resource.metadata.guid,
            name: resource.entity.name,
            organization: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Started => "STARTED",
            AppState::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudApplication {
    pub guid: String,
    pub name: String,
    pub space_guid: Option<String>,
    pub state: Option<String>,
    pub instances: Option<u32>,
    pub memory: Option<u32>,
}

impl From<Resource<ApplicationEntity>> for CloudApplication {
    fn from(resource: Resource<ApplicationEntity>) -> Self {
        Self {
            guid: resource.metadata.guid,
            name: resource.entity.name,
            space_guid: resource.entity.space_guid,
            state: resource.entity.state,
            instances: resource.entity.instances,
            memory: resource.entity.memory,
        }
    }
}

/// One entry of `GET /v2/apps/{guid}/crashes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashInfo {
    pub instance: String,
    #[serde(default)]
    pub index: Option<u32>,
    /// Unix seconds
    pub since: f64,
}

/// Returned by application start; points at the staging log when staging runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartingInfo {
    pub staging_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crashes() {
        let crashes: Vec<CrashInfo> = serde_json::from_str(
            r#"[
                {"instance": "a1b2", "index": 1, "since": 1403020418},
                {"instance": "c3d4", "since": 1403020401.5}
            ]"#,
        )
        .unwrap();
        assert_eq!(crashes[0].index, Some(1));
        assert_eq!(crashes[1].index, None);
        assert!(crashes[0].since > crashes[1].since);
    }

    #[test]
    fn test_parse_app_page() {
        let page: Page<ApplicationEntity> = serde_json::from_str(
            r#"{
                "total_results": 1,
                "total_pages": 1,
                "next_url": null,
                "resources": [{
                    "metadata": {"guid": "app-1", "url": "/v2/apps/app-1"},
                    "entity": {"name": "web", "space_guid": "space-1", "state": "STOPPED", "instances": 2}
                }]
            }"#,
        )
        .unwrap();

        let apps: Vec<CloudApplication> = page.resources.into_iter().map(Into::into).collect();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].guid, "app-1");
        assert_eq!(apps[0].name, "web");
        assert_eq!(apps[0].instances, Some(2));
    }

    #[test]
    fn test_app_state_wire_format() {
        assert_eq!(serde_json::to_string(&AppState::Started).unwrap(), "\"STARTED\"");
        assert_eq!(AppState::Stopped.as_str(), "STOPPED");
    }
}
