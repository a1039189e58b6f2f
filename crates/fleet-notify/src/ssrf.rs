//! Destination validation for outbound notification channels.
//!
//! Generalizes the predecessor's `InputValidator::{validate_ip_address,
//! is_internal_ip}` string-prefix IP classification into a DNS-resolving
//! check: the SMTP host guard must reject a hostname that *resolves to* a
//! private address, not just one that is spelled like one.

use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

use fleet_common::{Error, Result};

static TEAMS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://[A-Za-z0-9.-]+\.webhook\.office\.com(/.*)?$").unwrap());

static DISCORD_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(discord\.com|discordapp\.com)/api/webhooks/.+$").unwrap());

static TELEGRAM_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+:[A-Za-z0-9_-]{30,50}$").unwrap());

pub fn validate_teams_webhook_url(url: &str) -> Result<()> {
    if TEAMS_URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(Error::ValidationRejected(vec![format!(
            "teams webhook url must be HTTPS and end in .webhook.office.com: {url}"
        )]))
    }
}

pub fn validate_discord_webhook_url(url: &str) -> Result<()> {
    if DISCORD_URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(Error::ValidationRejected(vec![format!(
            "discord webhook url must match discord.com|discordapp.com/api/webhooks/*: {url}"
        )]))
    }
}

pub fn validate_telegram_bot_token(token: &str) -> Result<()> {
    if TELEGRAM_TOKEN_RE.is_match(token) {
        Ok(())
    } else {
        Err(Error::ValidationRejected(vec![
            "telegram bot token does not match the expected shape".to_string(),
        ]))
    }
}

/// True for loopback, link-local, RFC1918, and IPv6 equivalents.
fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Resolves `host` via DNS and rejects it if the hostname textually names a
/// loopback alias or any resolved address falls in a private/reserved range.
/// This is the only SMTP host validation in the tree: `NotificationsConfig`
/// has no runtime override path for `smtp_host`, so there is nothing else
/// to enforce against here.
pub async fn validate_smtp_host(host: &str) -> Result<()> {
    let lower = host.to_lowercase();
    if lower == "localhost" || lower.ends_with(".local") {
        return Err(Error::ValidationRejected(vec![format!(
            "smtp host must not be a loopback alias: {host}"
        )]));
    }

    let lookup_target = format!("{host}:25");
    let addrs = tokio::net::lookup_host(&lookup_target)
        .await
        .map_err(|e| Error::ValidationRejected(vec![format!("could not resolve smtp host {host}: {e}")]))?;

    for addr in addrs {
        if is_internal_ip(addr.ip()) {
            return Err(Error::ValidationRejected(vec![format!(
                "smtp host {host} resolves to a private or reserved address: {}",
                addr.ip()
            )]));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_teams_url() {
        assert!(validate_teams_webhook_url("https://contoso.webhook.office.com/webhookb2/abc").is_ok());
    }

    #[test]
    fn rejects_non_https_teams_url() {
        assert!(validate_teams_webhook_url("http://contoso.webhook.office.com/abc").is_err());
    }

    #[test]
    fn rejects_teams_url_with_wrong_suffix() {
        assert!(validate_teams_webhook_url("https://evil.example.com/webhook.office.com").is_err());
    }

    #[test]
    fn accepts_well_formed_discord_url() {
        assert!(validate_discord_webhook_url("https://discord.com/api/webhooks/1/abc").is_ok());
        assert!(validate_discord_webhook_url("https://discordapp.com/api/webhooks/1/abc").is_ok());
    }

    #[test]
    fn rejects_discord_url_on_wrong_host() {
        assert!(validate_discord_webhook_url("https://evil.example.com/api/webhooks/1/abc").is_err());
    }

    #[test]
    fn accepts_well_formed_telegram_token() {
        assert!(validate_telegram_bot_token("123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw").is_ok());
    }

    #[test]
    fn rejects_malformed_telegram_token() {
        assert!(validate_telegram_bot_token("not-a-token").is_err());
    }

    #[test]
    fn loopback_and_rfc1918_addresses_are_internal() {
        assert!(is_internal_ip("127.0.0.1".parse().unwrap()));
        assert!(is_internal_ip("10.0.0.5".parse().unwrap()));
        assert!(is_internal_ip("172.16.0.1".parse().unwrap()));
        assert!(is_internal_ip("192.168.1.1".parse().unwrap()));
        assert!(is_internal_ip("169.254.1.1".parse().unwrap()));
        assert!(is_internal_ip("::1".parse().unwrap()));
        assert!(!is_internal_ip("8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_localhost_alias_without_needing_dns() {
        assert!(validate_smtp_host("localhost").await.is_err());
        assert!(validate_smtp_host("mailhost.local").await.is_err());
    }
}
