use anyhow::Context;
use uuid::Uuid;

use crate::api::ConsoleClient;
use crate::config::{Config, Organization, Settings};
use crate::style;

pub async fn login(settings: &Settings) -> anyhow::Result<()> {
    let token = generate_token();
    let console = ConsoleClient::new(reqwest::Client::new(), &settings.console_url);
    let url = console.login_url(&token);

    let _ = open_browser(&url);
    style::dialog(&format!(
        "Opening the browser for you to sign in to Dispatch.\n\n\
         If the browser does not open, please visit the following URL:\n\n\
         {url}"
    ));
    println!("Logging in...");

    let response = match console.wait_for_login(&token).await {
        Ok(response) => response,
        Err(err) => {
            style::failure("Authentication failed. Please contact support at support@dispatch.run");
            return Err(err);
        }
    };

    let mut config = Config::default();
    for (i, organization) in response.organizations.iter().enumerate() {
        config.organizations.insert(
            organization.slug.clone(),
            Organization {
                api_key: organization.api_key.clone(),
            },
        );
        if i == 0 {
            config.active = organization.slug.clone();
        }
    }
    config
        .save(&settings.config_path)
        .context("failed to create config")?;

    style::success("Authentication successful");
    println!(
        "Configuration file created at {}",
        settings.config_path.display()
    );
    Ok(())
}

/// 32 random bytes rendered as hex, identifying one browser login exchange.
fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    let (program, args) = ("cmd", vec!["/c", "start", url]);
    #[cfg(target_os = "macos")]
    let (program, args) = ("open", vec![url]);
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let (program, args) = ("xdg-open", vec![url]);

    std::process::Command::new(program).args(args).spawn()?;
    Ok(())
}
