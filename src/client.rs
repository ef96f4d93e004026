// Client facade
// Wires transport, session, executor and space guard into one shareable handle

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auth::{
    account, CredentialStore, Credential, LoginCredentials, SessionManager, SessionSettings,
    TargetContext,
};
use crate::cache::InfoCache;
use crate::config::{ClientConfig, InitialTarget};
use crate::error::{ClientError, Result};
use crate::executor::{ApiResponse, Dispatcher, RequestExecutor};
use crate::models::resources::{ApplicationEntity, OrganizationEntity, SpaceEntity};
use crate::models::{
    AppState, CloudApplication, CloudInfo, CloudOrganization, CloudSpace, CrashInfo, StartingInfo,
};
use crate::observer::{ListenerId, ListenerRegistry, RequestListener};
use crate::request::{builders, FileQuery, RequestDescriptor};
use crate::resolver::SpaceResolver;
use crate::space_guard::SpaceGuard;
use crate::transport::{Transport, TransportFactory};

/// Response header naming the staging log of a starting application
const STAGING_LOG_HEADER: &str = "x-app-staging-log";

/// Client for one controller. `Send + Sync`; share it behind an `Arc`.
pub struct CloudControllerClient {
    controller_url: String,
    listeners: Arc<ListenerRegistry>,
    session: Arc<SessionManager>,
    executor: Arc<RequestExecutor>,
    guard: SpaceGuard,

    /// Org/space names to resolve after the next successful login
    pending_target: Mutex<Option<(String, Option<String>)>>,
}

impl CloudControllerClient {
    /// Build a client with the transport described by `config.transport`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = TransportFactory::build_shared(&config.transport)?;
        Self::with_transport(config, transport)
    }

    /// Build a client on top of an existing transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let (target, pending_target) = match config.target {
            InitialTarget::None => (TargetContext::default(), None),
            InitialTarget::Context(target) => (target, None),
            InitialTarget::Names {
                organization,
                space,
            } => (TargetContext::default(), Some((organization, space))),
        };

        let listeners = Arc::new(ListenerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            &config.controller_url,
            transport,
            listeners.clone(),
        ));
        let store = Arc::new(CredentialStore::new(config.credential, target));
        let session = Arc::new(SessionManager::new(
            dispatcher.clone(),
            store.clone(),
            InfoCache::new(config.info_ttl),
            SessionSettings {
                oauth_client: config.oauth_client,
                login_credentials: config.login,
                token_endpoint: config.token_endpoint,
                refresh_threshold: chrono::Duration::seconds(config.refresh_threshold.as_secs() as i64),
            },
        ));
        let executor = Arc::new(RequestExecutor::new(dispatcher, session.clone()));
        let guard = SpaceGuard::new(store, executor.clone());

        tracing::debug!(controller = %config.controller_url, "Cloud controller client created");

        Ok(Self {
            controller_url: config.controller_url.trim_end_matches('/').to_string(),
            listeners,
            session,
            executor,
            guard,
            pending_target: Mutex::new(pending_target),
        })
    }

    pub fn controller_url(&self) -> &str {
        &self.controller_url
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    // ==============================================================================================
    // Session
    // ==============================================================================================

    pub fn info(&self) -> Result<CloudInfo> {
        self.session.info()
    }

    /// Log in with the configured credentials
    ///
    /// Only the grant decides the outcome. Pending target names are resolved
    /// afterwards on a best-effort basis; when that fails they stay queued for
    /// [`CloudControllerClient::resolve_pending_target`].
    pub fn login(&self) -> Result<Credential> {
        let credential = self.session.login()?;

        if let Err(e) = self.resolve_pending_target() {
            tracing::warn!(error = %e, "Logged in, but the configured target could not be resolved");
        }

        Ok(credential)
    }

    /// Resolve org/space names given at construction and target them
    ///
    /// Returns the new target, or `None` when nothing was pending. On error the
    /// names stay pending and the current target is unchanged.
    pub fn resolve_pending_target(&self) -> Result<Option<TargetContext>> {
        let pending = self.pending_target.lock().clone();
        let Some((organization, space)) = pending else {
            return Ok(None);
        };

        match space {
            Some(space) => {
                self.target(&organization, &space)?;
            }
            None => {
                self.target_organization(&organization)?;
            }
        }
        *self.pending_target.lock() = None;
        Ok(Some(self.target_context()))
    }

    /// Replace the login credentials and log in with them
    pub fn login_with(&self, login: LoginCredentials) -> Result<Credential> {
        self.session.set_login_credentials(Some(login));
        self.login()
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn refresh(&self) -> Result<Credential> {
        self.session.refresh()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.session.credential()
    }

    pub fn set_credential(&self, credential: Option<Credential>) {
        self.session.set_credential(credential);
    }

    pub fn target_context(&self) -> TargetContext {
        self.session.target_context()
    }

    pub fn set_target_context(&self, target: TargetContext) {
        self.session.set_target_context(target);
    }

    /// Resolve names and make the space the target
    pub fn target(&self, organization: &str, space: &str) -> Result<CloudSpace> {
        let space = SpaceResolver::new(&self.executor).resolve(organization, space)?;
        self.session.set_target_context(TargetContext::for_space(space.clone()));
        tracing::info!(space = %space.name, organization = %organization, "Targeted space");
        Ok(space)
    }

    /// Target an organization with no space
    pub fn target_organization(&self, organization: &str) -> Result<CloudOrganization> {
        let organization = SpaceResolver::new(&self.executor).organization(organization)?;
        self.session
            .set_target_context(TargetContext::new(Some(organization.clone()), None));
        Ok(organization)
    }

    // ==============================================================================================
    // Accounts
    // ==============================================================================================

    /// Create a user account; returns the new user id
    pub fn register(&self, email: &str, password: &str) -> Result<String> {
        account::register(&self.executor, email, password)
    }

    /// Delete the logged-in account and log out
    pub fn unregister(&self) -> Result<()> {
        account::unregister(&self.executor)?;
        self.session.logout();
        Ok(())
    }

    /// Change the password of the logged-in user
    ///
    /// The configured password is sent as the old one and replaced on success.
    pub fn update_password(&self, new_password: &str) -> Result<()> {
        let login = self.session.login_credentials();
        let old_password = match &login {
            Some(LoginCredentials::Password { password, .. }) => Some(password.as_str()),
            _ => None,
        };

        account::update_password(&self.executor, old_password, new_password)?;

        if let Some(LoginCredentials::Password { username, .. }) = login {
            self.session
                .set_login_credentials(Some(LoginCredentials::password(username, new_password)));
        }
        Ok(())
    }

    // ==============================================================================================
    // Execution
    // ==============================================================================================

    pub fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        self.executor.execute(descriptor)
    }

    pub fn execute_json<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<T> {
        self.executor.execute_json(descriptor)
    }

    /// Run `operation` with the session pointed at `context`
    ///
    /// The context stays in place afterwards. See [`SpaceGuard::with_space`].
    pub fn with_space<T, F>(&self, context: impl Into<TargetContext>, operation: F) -> Result<T>
    where
        F: FnOnce(&RequestExecutor) -> Result<T>,
    {
        self.guard.with_space(context, operation)
    }

    pub fn register_listener(&self, listener: Arc<dyn RequestListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    // ==============================================================================================
    // Resources
    // ==============================================================================================

    pub fn organizations(&self) -> Result<Vec<CloudOrganization>> {
        let resources = self
            .executor
            .fetch_all::<OrganizationEntity>(&builders::organizations())?;
        Ok(resources.into_iter().map(Into::into).collect())
    }

    /// Spaces of the target organization
    pub fn spaces(&self) -> Result<Vec<CloudSpace>> {
        let organization = self.target_context().organization;
        let resources = self.executor.fetch_all::<SpaceEntity>(&builders::spaces())?;
        Ok(resources
            .into_iter()
            .map(|resource| {
                let space = CloudSpace::from(resource);
                match &organization {
                    Some(org) => space.in_organization(org.clone()),
                    None => space,
                }
            })
            .collect())
    }

    /// Applications of the target space
    pub fn applications(&self) -> Result<Vec<CloudApplication>> {
        let resources = self
            .executor
            .fetch_all::<ApplicationEntity>(&builders::applications())?;
        Ok(resources.into_iter().map(CloudApplication::from).collect())
    }

    pub fn application(&self, name: &str) -> Result<CloudApplication> {
        SpaceResolver::new(&self.executor).application(name)
    }

    pub fn start_application_in(&self, space: &CloudSpace, name: &str) -> Result<StartingInfo> {
        self.with_space(space.clone(), |executor| start_application(executor, name))
    }

    pub fn stop_application_in(&self, space: &CloudSpace, name: &str) -> Result<()> {
        self.with_space(space.clone(), |executor| stop_application(executor, name))
    }

    /// Stop then start, inside one space-scoped section
    pub fn restart_application_in(&self, space: &CloudSpace, name: &str) -> Result<StartingInfo> {
        self.with_space(space.clone(), |executor| {
            stop_application(executor, name)?;
            start_application(executor, name)
        })
    }

    pub fn delete_application_in(&self, space: &CloudSpace, name: &str) -> Result<()> {
        self.with_space(space.clone(), |executor| {
            let app = SpaceResolver::new(executor).application(name)?;
            executor.execute(&builders::delete_application(&app.guid))?;
            tracing::info!(app = name, app_guid = %app.guid, "Application deleted");
            Ok(())
        })
    }

    // ==============================================================================================
    // Files and logs
    // ==============================================================================================

    /// Contents (or a byte range) of a file in an application instance
    pub fn get_file(&self, query: &FileQuery) -> Result<String> {
        // Reject bad offsets before resolving the application
        query.range()?;

        let app = self.application(&query.app_name)?;
        let descriptor = builders::instance_file(&app.guid, query.instance, &query.path)
            .range_offsets(query.start, query.end, query.tail_length);
        Ok(self.executor.execute(&descriptor)?.text())
    }

    /// Last `length` bytes of a file
    pub fn get_file_tail(&self, app_name: &str, instance: u32, path: &str, length: i64) -> Result<String> {
        self.get_file(&FileQuery::new(app_name, instance, path).tail(length))
    }

    /// Logs of instance 0
    pub fn get_logs(&self, app_name: &str) -> Result<BTreeMap<String, String>> {
        self.get_instance_logs(app_name, 0)
    }

    /// Logs of the most recently crashed instance; empty when nothing crashed
    pub fn get_crash_logs(&self, app_name: &str) -> Result<BTreeMap<String, String>> {
        let app = self.application(app_name)?;
        let descriptor = builders::application_crashes(&app.guid);
        let crashes: Vec<CrashInfo> = self.executor.execute_json(&descriptor)?;

        let Some(latest) = crashes.into_iter().max_by(|a, b| a.since.total_cmp(&b.since)) else {
            return Ok(BTreeMap::new());
        };
        let index = latest.index.ok_or_else(|| ClientError::Decode {
            operation: descriptor.operation(),
            message: format!("Crash of instance {} has no index", latest.instance),
        })?;

        tracing::debug!(app = app_name, instance = index, "Reading logs of crashed instance");
        self.get_instance_logs(app_name, index)
    }

    /// Every file under `logs/` of an instance, by file name
    pub fn get_instance_logs(&self, app_name: &str, instance: u32) -> Result<BTreeMap<String, String>> {
        let listing = self.get_file(&FileQuery::new(app_name, instance, "logs/"))?;

        let mut logs = BTreeMap::new();
        for name in parse_listing(&listing) {
            let content = self.get_file(&FileQuery::new(app_name, instance, format!("logs/{}", name)))?;
            logs.insert(name, content);
        }
        Ok(logs)
    }

    /// Staging output after `offset` bytes; `None` once the log is gone
    pub fn get_staging_logs(&self, info: &StartingInfo, offset: u64) -> Result<Option<String>> {
        let staging_file = info.staging_file.as_deref().ok_or_else(|| {
            ClientError::Validation("Application start did not report a staging log".to_string())
        })?;

        match self.executor.execute(&builders::staging_log(staging_file, offset)) {
            Ok(response) => Ok(Some(response.text())),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn start_application(executor: &RequestExecutor, name: &str) -> Result<StartingInfo> {
    let app = SpaceResolver::new(executor).application(name)?;
    let response = executor.execute(&builders::update_application_state(&app.guid, AppState::Started))?;

    let info = StartingInfo {
        staging_file: response.header(STAGING_LOG_HEADER).map(str::to_string),
    };
    tracing::info!(app = name, app_guid = %app.guid, staging = ?info.staging_file, "Application started");
    Ok(info)
}

fn stop_application(executor: &RequestExecutor, name: &str) -> Result<()> {
    let app = SpaceResolver::new(executor).application(name)?;
    executor.execute(&builders::update_application_state(&app.guid, AppState::Stopped))?;
    tracing::info!(app = name, app_guid = %app.guid, "Application stopped");
    Ok(())
}

/// File names from a directory listing; subdirectories end in `/` and are skipped
fn parse_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let listing = "staging_task.log                         1.2K\nstderr.log   0B\nstdout.log   14.0K\ntmp/  -\n\n";
        assert_eq!(
            parse_listing(listing),
            vec!["staging_task.log", "stderr.log", "stdout.log"]
        );
    }

    #[test]
    fn test_client_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CloudControllerClient>();
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let err = CloudControllerClient::new(ClientConfig::new("::nope")).err().unwrap();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
}
