use crate::cli::CliArgs;
use crate::dispatch::DEFAULT_MIN_FEEDBACK;
use crate::menu::DEFAULT_ANCHOR_MARGIN;
use crate::poller::DEFAULT_POLL_INTERVAL;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_REFRESH_MS: u64 = 5_000;
const MIN_REFRESH_MS: u64 = 500;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    pub source: Option<String>,
    pub api_url: String,
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub min_feedback: Duration,
    pub menu_margin: u16,
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HostdeckConfigFile {
    #[serde(default, alias = "api", alias = "url")]
    api_url: Option<String>,
    #[serde(default, alias = "poll_interval_ms")]
    poll_ms: Option<u64>,
    #[serde(default, alias = "refresh_interval_ms")]
    refresh_ms: Option<u64>,
    #[serde(default, alias = "min_feedback_ms")]
    feedback_ms: Option<u64>,
    #[serde(default)]
    menu_margin: Option<u16>,
    #[serde(default)]
    state_file: Option<PathBuf>,
}

impl Settings {
    /// Defaults, overlaid by the discovered config file, overlaid by CLI flags.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let (source, file) = match discover_config_path() {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let parsed = parse_config(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?;
                (Some(path.display().to_string()), parsed)
            }
            None => (None, HostdeckConfigFile::default()),
        };
        Ok(Self::merge(source, file, args))
    }

    fn merge(source: Option<String>, file: HostdeckConfigFile, args: &CliArgs) -> Self {
        let api_url = args
            .api_url
            .clone()
            .or(file.api_url)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let poll_interval = args
            .poll_ms
            .or(file.poll_ms)
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let refresh_ms = args
            .refresh_ms
            .or(file.refresh_ms)
            .unwrap_or(DEFAULT_REFRESH_MS)
            .max(MIN_REFRESH_MS);
        let min_feedback = args
            .feedback_ms
            .or(file.feedback_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MIN_FEEDBACK);
        let state_file = args
            .state_file
            .clone()
            .or(file.state_file)
            .unwrap_or_else(default_state_file);

        Self {
            source,
            api_url,
            poll_interval,
            refresh_interval: Duration::from_millis(refresh_ms),
            min_feedback,
            menu_margin: file.menu_margin.unwrap_or(DEFAULT_ANCHOR_MARGIN),
            state_file,
        }
    }
}

fn parse_config(raw: &str) -> Result<HostdeckConfigFile> {
    if raw.trim().is_empty() {
        return Ok(HostdeckConfigFile::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

fn default_state_file() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => {
            PathBuf::from(home).join(".config/hostdeck/state.json")
        }
        _ => PathBuf::from(".hostdeck-state.json"),
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HOSTDECK_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("hostdeck.yaml"),
        PathBuf::from("hostdeck.yml"),
        PathBuf::from(".hostdeck.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/hostdeck/config.yaml"),
            PathBuf::from(&home).join(".config/hostdeck/config.yml"),
            PathBuf::from(&home).join(".hostdeck.yaml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{Settings, parse_config};
    use crate::cli::CliArgs;
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn cli_overrides_file_and_defaults_fill_gaps() {
        let file = parse_config(
            "api_url: https://panel.example.com/\npoll_interval_ms: 3000\nmenu_margin: 2\n",
        )
        .unwrap();
        let args = CliArgs::parse_from(["hostdeck", "--poll-ms", "1500", "--state-file", "/tmp/s.json"]);

        let settings = Settings::merge(Some("hostdeck.yaml".to_string()), file, &args);
        assert_eq!(settings.api_url, "https://panel.example.com/");
        assert_eq!(settings.poll_interval, Duration::from_millis(1_500));
        assert_eq!(settings.refresh_interval, Duration::from_millis(5_000));
        assert_eq!(settings.min_feedback, Duration::from_millis(600));
        assert_eq!(settings.menu_margin, 2);
        assert_eq!(settings.state_file, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn refresh_interval_has_a_floor() {
        let args = CliArgs::parse_from(["hostdeck", "--refresh-ms", "10"]);
        let settings = Settings::merge(None, parse_config("").unwrap(), &args);
        assert_eq!(settings.refresh_interval, Duration::from_millis(500));
        assert_eq!(settings.poll_interval, Duration::from_millis(2_000));
    }
}
