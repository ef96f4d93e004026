// UAA account management
// Single authenticated calls against the UAA discovered from controller info

use serde::Deserialize;

use crate::error::{ClientError, Result};
use crate::executor::RequestExecutor;
use crate::request::builders;

#[derive(Debug, Deserialize)]
struct UserInfo {
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
}

fn uaa_url(executor: &RequestExecutor) -> Result<String> {
    Ok(executor.session().info()?.uaa_url().to_string())
}

fn current_user(executor: &RequestExecutor, uaa: &str) -> Result<UserInfo> {
    let user: UserInfo = executor.execute_json(&builders::user_info(uaa))?;
    if user.user_id.is_empty() {
        return Err(ClientError::Decode {
            operation: format!("GET {}/userinfo", uaa),
            message: "userinfo response has no user_id".to_string(),
        });
    }
    Ok(user)
}

/// Create a user account; returns the new user id
pub fn register(executor: &RequestExecutor, email: &str, password: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct Created {
        id: String,
    }

    let uaa = uaa_url(executor)?;
    let created: Created = executor.execute_json(&builders::create_user(&uaa, email, password))?;
    tracing::info!(user = email, user_id = %created.id, "Registered user");
    Ok(created.id)
}

/// Change the logged-in user's password
pub fn update_password(
    executor: &RequestExecutor,
    old_password: Option<&str>,
    new_password: &str,
) -> Result<()> {
    let uaa = uaa_url(executor)?;
    let user = current_user(executor, &uaa)?;
    executor.execute(&builders::change_password(
        &uaa,
        &user.user_id,
        old_password,
        new_password,
    ))?;
    tracing::info!(user = ?user.user_name, "Password updated");
    Ok(())
}

/// Delete the logged-in user's account
pub fn unregister(executor: &RequestExecutor) -> Result<()> {
    let uaa = uaa_url(executor)?;
    let user = current_user(executor, &uaa)?;
    executor.execute(&builders::delete_user(&uaa, &user.user_id))?;
    tracing::info!(user = ?user.user_name, "Unregistered user");
    Ok(())
}
