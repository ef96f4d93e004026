// Data models for controller resources
// Plain records; the controller owns the schema

pub mod info;
pub mod resources;

pub use info::CloudInfo;
pub use resources::{
    AppState, CloudApplication, CrashInfo, CloudOrganization, CloudSpace, Metadata, Page, Resource,
    StartingInfo,
};
