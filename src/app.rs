use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::data::{self, AuthService, ListingService, ReputationService, UserService};
use crate::logging;
use crate::servlet;
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use in-memory services instead of the servlets.
    pub demo: bool,
    pub config_file: Option<PathBuf>,
}

struct Services {
    auth: Arc<dyn AuthService>,
    listings: Arc<dyn ListingService>,
    users: Arc<dyn UserService>,
    reputation: Arc<dyn ReputationService>,
    base_url: Option<url::Url>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(path) = logging::init_tracing(&cfg.logging).context("init logging")? {
        tracing::debug!(path = %path.display(), "log file ready");
    }

    let services = if options.demo {
        tracing::info!("running with demo services");
        demo_services()
    } else {
        servlet_services(&cfg.server)?
    };

    let status = if options.demo {
        "Demo mode: sample listings, nothing is sent to a server.".to_string()
    } else {
        format!("Connecting to {}…", cfg.server.base_url)
    };

    let ui_options = ui::Options {
        status_message: status,
        query: cfg.search.initial_query(),
        auth_service: services.auth,
        listing_service: services.listings,
        user_service: services.users,
        reputation_service: services.reputation,
        base_url: services.base_url,
        config_path: options.config_file,
    };

    let mut model = ui::Model::new(ui_options);
    model.run()
}

/// Prints the authentication state reported by the servlet and exits.
pub fn whoami(config_file: Option<PathBuf>) -> Result<String> {
    let cfg = config::load(config::LoadOptions {
        config_file,
        env_prefix: None,
    })
    .context("load config")?;
    let client = build_client(&cfg.server)?;
    let info = client.authentication()?;
    Ok(describe_auth(&info, client.base_url()))
}

fn describe_auth(info: &crate::listing::AuthenticationInfo, base_url: &url::Url) -> String {
    let link = info
        .link()
        .map(|(label, url)| {
            let resolved = url::Url::parse(url)
                .or_else(|_| base_url.join(url))
                .map(|url| url.to_string())
                .unwrap_or_else(|_| url.to_string());
            format!("{label}: {resolved}")
        })
        .unwrap_or_default();
    if info.user_is_logged_in {
        let email = info.user_email.as_deref().unwrap_or("unknown user");
        let admin = if info.user_is_admin { " (admin)" } else { "" };
        format!("Logged in as {email}{admin} at {base_url}\n{link}")
            .trim_end()
            .to_string()
    } else {
        format!("Not logged in at {base_url}\n{link}")
            .trim_end()
            .to_string()
    }
}

fn build_client(server: &config::ServerConfig) -> Result<servlet::Client> {
    servlet::Client::new(servlet::ClientConfig {
        user_agent: server.user_agent.clone(),
        base_url: Some(server.base_url.clone()),
        timeout: Some(server.timeout),
        http_client: None,
    })
    .context("create servlet client")
}

fn servlet_services(server: &config::ServerConfig) -> Result<Services> {
    let client = Arc::new(build_client(server)?);
    let base_url = Some(client.base_url().clone());
    Ok(Services {
        auth: Arc::new(data::ServletAuthService::new(client.clone())),
        listings: Arc::new(data::ServletListingService::new(client.clone())),
        users: Arc::new(data::ServletUserService::new(client.clone())),
        reputation: Arc::new(data::ServletReputationService::new(client)),
        base_url,
    })
}

fn demo_services() -> Services {
    let listings = data::MockListingService::default();
    let reputation = listings.reputation_service();
    Services {
        auth: Arc::new(data::MockAuthService),
        listings: Arc::new(listings),
        users: Arc::new(data::MockUserService),
        reputation: Arc::new(reputation),
        base_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::AuthenticationInfo;

    #[test]
    fn describe_logged_in_user() {
        let base = url::Url::parse("http://localhost:8080/").unwrap();
        let info = AuthenticationInfo {
            user_is_logged_in: true,
            user_is_admin: true,
            user_email: Some("a@b.c".into()),
            logout_link: Some("/_ah/logout".into()),
            ..AuthenticationInfo::default()
        };
        assert_eq!(
            describe_auth(&info, &base),
            "Logged in as a@b.c (admin) at http://localhost:8080/\nLogout: http://localhost:8080/_ah/logout"
        );
    }

    #[test]
    fn describe_logged_out_user_without_link() {
        let base = url::Url::parse("http://localhost:8080/").unwrap();
        let info = AuthenticationInfo::default();
        assert_eq!(describe_auth(&info, &base), "Not logged in at http://localhost:8080/");
    }
}
