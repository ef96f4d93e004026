use anyhow::{Context, Result};
use dialoguer::Password;
use std::sync::Arc;

use cloud_controller_client::auth::{StoredSession, TokenFile};
use cloud_controller_client::config::{Command, Config};
use cloud_controller_client::models::CloudSpace;
use cloud_controller_client::observer::{RequestStats, TracingListener};
use cloud_controller_client::request::FileQuery;
use cloud_controller_client::CloudControllerClient;

fn main() -> Result<()> {
    let mut config = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    if config.command == Command::Login || config.command == Command::Passwd {
        prompt_missing_password(&mut config)?;
    }

    let token_file = TokenFile::new(config.token_file.clone());
    let mut client_config = config.client_config()?;
    if let Some(saved) = token_file.load(&config.controller_url)? {
        tracing::debug!(path = %token_file.path().display(), "Loaded saved session");
        client_config = client_config
            .with_credential(saved.credential)
            .with_target(saved.target);
    }

    let client = CloudControllerClient::new(client_config)?;
    client.register_listener(Arc::new(TracingListener));
    let stats = Arc::new(RequestStats::new());
    if config.show_stats {
        client.register_listener(stats.clone());
    }

    let outcome = run(&client, &config);

    // Keep refreshed tokens and targets even when the command failed
    match client.credential() {
        Some(credential) => token_file.save(
            client.controller_url(),
            StoredSession {
                credential,
                target: client.target_context(),
            },
        )?,
        None => {
            token_file.remove(client.controller_url())?;
        }
    }

    if config.show_stats {
        print_stats(&stats);
    }

    outcome
}

fn run(client: &CloudControllerClient, config: &Config) -> Result<()> {
    match &config.command {
        Command::Info => {
            let info = client.info()?;
            println!("API endpoint:   {}", client.controller_url());
            println!("API version:    {}", info.api_version.as_deref().unwrap_or("-"));
            println!("Login endpoint: {}", info.authorization_endpoint);
            if let Some(description) = &info.description {
                println!("Description:    {}", description);
            }
        }
        Command::Login => {
            client.login()?;
            println!("Logged in to {}", client.controller_url());
            if let Some(org) = &config.org {
                match &config.space {
                    Some(space) => {
                        client.target(org, space)?;
                    }
                    None => {
                        client.target_organization(org)?;
                    }
                }
            }
            print_target(client);
        }
        Command::Logout => {
            client.logout();
            println!("Logged out");
        }
        Command::Target { org, space } => {
            match space {
                Some(space) => {
                    client.target(org, space)?;
                }
                None => {
                    client.target_organization(org)?;
                }
            }
            print_target(client);
        }
        Command::Apps => {
            let apps = client.applications()?;
            println!("{:<30} {:<10} {:>9} {:>8}", "name", "state", "instances", "memory");
            for app in apps {
                println!(
                    "{:<30} {:<10} {:>9} {:>8}",
                    app.name,
                    app.state.as_deref().unwrap_or("-"),
                    app.instances.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
                    app.memory.map(|m| format!("{}M", m)).unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Command::Start { app } => {
            let info = client.start_application_in(&target_space(client)?, app)?;
            println!("Started {}", app);
            print_staging(client, &info)?;
        }
        Command::Stop { app } => {
            client.stop_application_in(&target_space(client)?, app)?;
            println!("Stopped {}", app);
        }
        Command::Restart { app } => {
            let info = client.restart_application_in(&target_space(client)?, app)?;
            println!("Restarted {}", app);
            print_staging(client, &info)?;
        }
        Command::Delete { app } => {
            client.delete_application_in(&target_space(client)?, app)?;
            println!("Deleted {}", app);
        }
        Command::File {
            app,
            path,
            instance,
            start,
            end,
            tail,
        } => {
            let mut query = FileQuery::new(app.clone(), *instance, path.clone());
            match (start, end, tail) {
                (_, _, Some(length)) => query = query.tail(*length),
                (Some(start), Some(end), None) => query = query.between(*start, *end),
                (Some(start), None, None) => query = query.starting_at(*start),
                (None, Some(end), None) => query = query.between(0, *end),
                (None, None, None) => {}
            }
            print!("{}", client.get_file(&query)?);
        }
        Command::Logs { app, instance } => {
            for (name, content) in client.get_instance_logs(app, *instance)? {
                println!("==> logs/{} <==", name);
                println!("{}", content);
            }
        }
        Command::Passwd => {
            let new_password: String = Password::new()
                .with_prompt("New password")
                .with_confirmation("Verify password", "Passwords do not match")
                .interact()
                .context("Failed to read new password")?;
            client.update_password(&new_password)?;
            println!("Password updated; log in again with the new password");
            client.logout();
        }
    }
    Ok(())
}

fn prompt_missing_password(config: &mut Config) -> Result<()> {
    if config.username.is_some() && config.password.is_none() {
        let password: String = Password::new()
            .with_prompt(format!(
                "Password for {}",
                config.username.as_deref().unwrap_or_default()
            ))
            .interact()
            .context("Failed to read password")?;
        config.password = Some(password);
    }
    if config.command == Command::Login && config.username.is_none() {
        anyhow::bail!("CF_USERNAME is required to log in (use -u or set CF_USERNAME env var)");
    }
    Ok(())
}

fn target_space(client: &CloudControllerClient) -> Result<CloudSpace> {
    client
        .target_context()
        .space
        .context("No space targeted; run `cfc target <org> <space>` first")
}

fn print_target(client: &CloudControllerClient) {
    let target = client.target_context();
    println!(
        "Org:   {}",
        target.organization.as_ref().map(|o| o.name.as_str()).unwrap_or("-")
    );
    println!(
        "Space: {}",
        target.space.as_ref().map(|s| s.name.as_str()).unwrap_or("-")
    );
}

fn print_staging(client: &CloudControllerClient, info: &cloud_controller_client::models::StartingInfo) -> Result<()> {
    if info.staging_file.is_some() {
        if let Some(log) = client.get_staging_logs(info, 0)? {
            print!("{}", log);
        }
    }
    Ok(())
}

fn print_stats(stats: &RequestStats) {
    eprintln!();
    eprintln!(
        "{} requests, {} failed",
        stats.total_requests(),
        stats.total_errors()
    );
    for (route, requests, errors, avg_ms) in stats.snapshot() {
        eprintln!("  {:<50} {:>5} {:>5} {:>8.1}ms", route, requests, errors, avg_ms);
    }
}
