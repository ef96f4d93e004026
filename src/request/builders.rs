// Typed descriptor builders per resource category

use reqwest::Method;
use serde_json::json;

use super::RequestDescriptor;
use crate::auth::OAuthClient;
use crate::models::AppState;

// ==================================================================================================
// Info
// ==================================================================================================

/// Anonymous controller discovery document
pub fn info() -> RequestDescriptor {
    RequestDescriptor::get("/v2/info").anonymous()
}

// ==================================================================================================
// Token endpoint
// ==================================================================================================

fn token_request(token_url: &str, client: &OAuthClient) -> RequestDescriptor {
    RequestDescriptor::absolute(Method::POST, token_url)
        .basic_auth(client.client_id.clone(), client.client_secret.clone())
}

/// Resource owner password grant
pub fn password_grant(
    token_url: &str,
    client: &OAuthClient,
    username: &str,
    password: &str,
) -> RequestDescriptor {
    token_request(token_url, client).form([
        ("grant_type", "password"),
        ("username", username),
        ("password", password),
    ])
}

pub fn client_credentials_grant(token_url: &str, client: &OAuthClient) -> RequestDescriptor {
    token_request(token_url, client).form([("grant_type", "client_credentials")])
}

pub fn refresh_grant(token_url: &str, client: &OAuthClient, refresh_token: &str) -> RequestDescriptor {
    token_request(token_url, client).form([
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ])
}

// ==================================================================================================
// Organizations and spaces
// ==================================================================================================

pub fn organizations() -> RequestDescriptor {
    RequestDescriptor::get("/v2/organizations")
}

pub fn organization_by_name(name: &str) -> RequestDescriptor {
    organizations().query("q", format!("name:{}", name))
}

/// Spaces of the target organization
pub fn spaces() -> RequestDescriptor {
    RequestDescriptor::get("/v2/organizations/{org_guid}/spaces")
}

/// Space lookup in an explicit organization, independent of the target context
pub fn space_by_name(org_guid: &str, name: &str) -> RequestDescriptor {
    RequestDescriptor::get(format!("/v2/organizations/{}/spaces", org_guid))
        .query("q", format!("name:{}", name))
}

// ==================================================================================================
// Applications
// ==================================================================================================

/// Applications of the target space
pub fn applications() -> RequestDescriptor {
    RequestDescriptor::get("/v2/spaces/{space_guid}/apps")
}

pub fn application_by_name(name: &str) -> RequestDescriptor {
    applications().query("q", format!("name:{}", name))
}

pub fn update_application_state(app_guid: &str, state: AppState) -> RequestDescriptor {
    RequestDescriptor::put(format!("/v2/apps/{}", app_guid))
        .json_value(json!({ "state": state.as_str() }))
}

pub fn delete_application(app_guid: &str) -> RequestDescriptor {
    RequestDescriptor::delete(format!("/v2/apps/{}", app_guid)).query("recursive", "true")
}

/// Instances of an application that crashed recently
pub fn application_crashes(app_guid: &str) -> RequestDescriptor {
    RequestDescriptor::get(format!("/v2/apps/{}/crashes", app_guid))
}

/// A file (or directory listing) inside a running instance
pub fn instance_file(app_guid: &str, instance: u32, path: &str) -> RequestDescriptor {
    RequestDescriptor::get(format!(
        "/v2/apps/{}/instances/{}/files/{}",
        app_guid,
        instance,
        path.trim_start_matches('/')
    ))
}

/// Staging log as streamed by the controller, skipping the first `offset` bytes
pub fn staging_log(staging_file: &str, offset: u64) -> RequestDescriptor {
    RequestDescriptor::absolute(Method::GET, staging_file)
        .query("tail", "")
        .query("tail_offset", offset.to_string())
}

// ==================================================================================================
// UAA accounts
// ==================================================================================================

pub fn user_info(uaa_url: &str) -> RequestDescriptor {
    RequestDescriptor::absolute(Method::GET, format!("{}/userinfo", uaa_url))
}

pub fn create_user(uaa_url: &str, email: &str, password: &str) -> RequestDescriptor {
    RequestDescriptor::absolute(Method::POST, format!("{}/Users", uaa_url)).json_value(json!({
        "userName": email,
        "emails": [{ "value": email }],
        "password": password,
        "name": { "givenName": email, "familyName": email },
    }))
}

pub fn change_password(
    uaa_url: &str,
    user_id: &str,
    old_password: Option<&str>,
    new_password: &str,
) -> RequestDescriptor {
    let mut body = json!({ "password": new_password });
    if let Some(old) = old_password {
        body["oldPassword"] = json!(old);
    }
    RequestDescriptor::absolute(Method::PUT, format!("{}/Users/{}/password", uaa_url, user_id))
        .json_value(body)
}

pub fn delete_user(uaa_url: &str, user_id: &str) -> RequestDescriptor {
    RequestDescriptor::absolute(Method::DELETE, format!("{}/Users/{}", uaa_url, user_id))
}
