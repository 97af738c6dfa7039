use std::sync::Arc;

use anyhow::Context;
use inquire::{Confirm, Password};
use weather_core::{
    CacheError, Credential, CredentialError, FetchError, FetchOrchestrator, OpenWeatherClient,
    Providers, ResponseCache,
};

use crate::{
    bootstrap::AppContext,
    render::{mask_credential, render_config, render_json, render_snapshot},
};

/// Errors that carry a terminal-friendly message.
trait UserMessage: std::error::Error + Send + Sync + 'static {
    fn message(&self) -> String;
}

impl UserMessage for FetchError {
    fn message(&self) -> String {
        self.user_message().to_string()
    }
}

impl UserMessage for CredentialError {
    fn message(&self) -> String {
        self.user_message().to_string()
    }
}

impl UserMessage for CacheError {
    fn message(&self) -> String {
        self.user_message().to_string()
    }
}

/// The user message on top, the technical cause underneath.
fn user_error(err: impl UserMessage) -> anyhow::Error {
    let message = err.message();
    anyhow::Error::new(err).context(message)
}

pub fn show(ctx: &AppContext, locations: &[String], json: bool) -> anyhow::Result<()> {
    let client = Arc::new(OpenWeatherClient::new(ctx.config.base_url.value.clone()));
    let guard = FetchOrchestrator::open(&ctx.config, Providers::shared(client));

    if let [location] = locations {
        let snapshot = guard.fetch(location, &ctx.config).map_err(user_error)?;
        if json {
            let out = render_json(std::slice::from_ref(&snapshot), true)
                .context("Failed to serialise snapshot")?;
            println!("{out}");
        } else {
            println!("{}", render_snapshot(&snapshot));
        }
        return Ok(());
    }

    let results = guard.fetch_many(locations, &ctx.config);
    let mut snapshots = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (location, result) in locations.iter().zip(results) {
        match result {
            Ok(snapshot) if json => snapshots.push(snapshot),
            Ok(snapshot) => println!("{}\n", render_snapshot(&snapshot)),
            Err(err) => {
                failed += 1;
                tracing::debug!(error = %err, "Lookup failed");
                eprintln!("{location}: {}", err.user_message());
            }
        }
    }

    if json {
        let out = render_json(&snapshots, false).context("Failed to serialise snapshots")?;
        println!("{out}");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} lookups failed", locations.len());
    }
    Ok(())
}

pub fn api_key_set(ctx: &AppContext, key: Option<String>) -> anyhow::Result<()> {
    let raw = match key {
        Some(key) => key,
        None => Password::new("OpenWeatherMap API key:")
            .without_confirmation()
            .with_help_message("Get a free key at https://openweathermap.org/api")
            .prompt()?,
    };
    let credential = Credential::new(&raw).map_err(user_error)?;

    if ctx.store.is_available() {
        ctx.store.set(credential.expose()).map_err(user_error)?;
        println!("API key stored in the system keyring.");
        return Ok(());
    }

    let file = ctx
        .credential_file()
        .context("No keyring available and the home directory is unknown")?;
    file.write(&credential).map_err(user_error)?;
    tracing::warn!("System keyring unavailable; stored the API key in the home env file");
    println!("Keyring unavailable; API key saved to {}", file.path().display());
    Ok(())
}

pub fn api_key_view(ctx: &AppContext) {
    let config = &ctx.config;
    match config.credential() {
        Some(credential) => {
            println!("API key: {} ({})", mask_credential(Some(credential)), config.api_key.source)
        }
        None => println!("No API key configured."),
    }
}

pub fn api_key_remove(ctx: &AppContext, force: bool) -> anyhow::Result<()> {
    if !force && !confirm("Remove the stored API key?")? {
        println!("Cancelled.");
        return Ok(());
    }

    ctx.store.remove().map_err(user_error)?;

    let removed_from_file = match ctx.credential_file() {
        Some(file) => file.remove().map_err(user_error)?,
        None => false,
    };

    if ctx.store.is_available() {
        println!("API key removed from the system keyring.");
    }
    if removed_from_file {
        println!("API key removed from the home env file.");
    }
    if !ctx.store.is_available() && !removed_from_file {
        println!("No stored API key found.");
    }
    Ok(())
}

pub fn cache_clear(ctx: &AppContext, force: bool) -> anyhow::Result<()> {
    let path = &ctx.config.cache_file.value;
    if !force && !confirm(&format!("Delete the cache file {}?", path.display()))? {
        println!("Cancelled.");
        return Ok(());
    }

    if ResponseCache::clear_file(path).map_err(user_error)? {
        println!("Cache cleared: {}", path.display());
    } else {
        println!("No cache file at {}", path.display());
    }
    Ok(())
}

pub fn cache_status(ctx: &AppContext) -> anyhow::Result<()> {
    let config = &ctx.config;
    let path = &config.cache_file.value;

    println!("Cache file: {}", path.display());
    println!(
        "Persistence: {} ({})",
        if config.cache_persist.value { "enabled" } else { "disabled" },
        config.cache_persist.source
    );

    match ResponseCache::inspect_file(path) {
        Ok(Some(info)) => {
            println!("Size: {} bytes", info.size_bytes);
            println!("Entries: {}", info.entries);
            for key in info.keys {
                println!("  {key}");
            }
        }
        Ok(None) => println!("No cache file yet."),
        Err(err) => eprintln!("{}", err.user_message()),
    }
    Ok(())
}

pub fn cache_ttl(ctx: &AppContext) {
    let ttl = &ctx.config.cache_ttl_seconds;
    if ttl.value == 0 {
        println!("Caching disabled (TTL 0, from {})", ttl.source);
    } else {
        println!("Cache TTL: {} seconds (from {})", ttl.value, ttl.source);
    }
}

pub fn config_show(ctx: &AppContext) {
    println!("{}", render_config(&ctx.config));
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new(prompt).with_default(false).prompt()?)
}
