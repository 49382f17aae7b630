/*
 * Copyright 2024 Oxide Computer Company
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;

#[derive(
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Region {
    China,
    #[default]
    Other,
}

impl Region {
    /**
     * GraphQL endpoint used when a profile does not name one.
     */
    pub fn default_url(&self) -> &'static str {
        match self {
            Region::China => "https://api.helioam.cn/graphql",
            Region::Other => "https://api.helioadditive.com/graphql",
        }
    }

    /**
     * Base of the REST API that hands out anonymous tokens.
     */
    pub fn rest_url(&self) -> &'static str {
        match self {
            Region::China => "https://api.helioam.cn/rest",
            Region::Other => "https://api.helioadditive.com/rest",
        }
    }

    pub fn accept_language(&self) -> Option<&'static str> {
        match self {
            Region::China => Some("zh-CN"),
            Region::Other => None,
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub region: Region,
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profile: HashMap<String, FileProfile>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FileProfile {
    pub url: Option<String>,
    pub pat: Option<String>,
}

/**
 * Where to reach the service and how to authenticate.  Either field may be
 * empty; the orchestrator reports that to the user rather than failing here.
 */
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub region: Region,
    pub url: String,
    pub pat: String,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("region", &self.region)
            .field("url", &self.url)
            .field("pat", &if self.pat.is_empty() { "<unset>" } else { "..." })
            .finish()
    }
}

fn env(n: &str) -> Option<String> {
    std::env::var(n).map(Some).unwrap_or(None)
}

fn env_region() -> Result<Option<Region>> {
    env("HELIO_REGION")
        .map(|r| {
            r.parse::<Region>()
                .map_err(|_| anyhow!("invalid HELIO_REGION {:?}", r))
        })
        .transpose()
}

impl Profile {
    fn from_env() -> Result<Option<Profile>> {
        let url = env("HELIO_API_URL");
        let pat = env("HELIO_PAT");
        let region = env_region()?.unwrap_or_default();

        Ok(match (url, pat) {
            (Some(url), Some(pat)) => Some(Profile { region, url, pat }),
            _ => None,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(region) = env_region()? {
            self.region = region;
        }
        if let Some(url) = env("HELIO_API_URL") {
            self.url = url;
        }
        if let Some(pat) = env("HELIO_PAT") {
            self.pat = pat;
        }
        Ok(())
    }
}

impl Config {
    /**
     * Select a profile from the file.  A profile without a URL gets the
     * default endpoint for the configured region.
     */
    pub fn profile(&self, name: Option<&str>) -> Result<Profile> {
        let name = if let Some(name) = name {
            name
        } else if let Some(name) = self.default_profile.as_deref() {
            name
        } else {
            "default"
        };

        let Some(fp) = self.profile.get(name) else {
            bail!("profile \"{}\" not found in configuration", name);
        };

        Ok(Profile {
            region: self.region,
            url: fp
                .url
                .clone()
                .unwrap_or_else(|| self.region.default_url().to_string()),
            pat: fp.pat.clone().unwrap_or_default(),
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    let mut path = dirs_next::config_dir()
        .ok_or_else(|| anyhow!("could not find config directory"))?;
    path.push("helio");
    path.push("config.toml");
    Ok(path)
}

pub fn load_from(path: &Path, profile: Option<&str>) -> Result<Profile> {
    let c: Config = helio_common::read_toml(path)?;
    let mut p = c.profile(profile)?;
    p.apply_env()?;
    Ok(p)
}

pub fn load(profile: Option<&str>) -> Result<Profile> {
    /*
     * First, try to use the environment.  If we have a complete profile in the
     * environment we don't need to look at the file system at all.
     */
    if let Some(p) = Profile::from_env()? {
        return Ok(p);
    }

    load_from(&config_path()?, profile)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn region_defaults() {
        let c = parse(
            r#"
            [profile.default]
            pat = "abc"
            "#,
        );
        assert_eq!(c.region, Region::Other);

        let p = c.profile(None).unwrap();
        assert_eq!(p.url, "https://api.helioadditive.com/graphql");
        assert_eq!(p.pat, "abc");
        assert_eq!(p.region.accept_language(), None);
    }

    #[test]
    fn named_profiles() {
        let c = parse(
            r#"
            region = "china"
            default_profile = "work"

            [profile.work]
            url = "https://example.test/graphql"

            [profile.home]
            pat = "xyz"
            "#,
        );

        let p = c.profile(None).unwrap();
        assert_eq!(p.url, "https://example.test/graphql");
        assert_eq!(p.pat, "");
        assert_eq!(p.region.accept_language(), Some("zh-CN"));

        let p = c.profile(Some("home")).unwrap();
        assert_eq!(p.url, Region::China.default_url());

        assert!(c.profile(Some("missing")).is_err());
    }

    #[test]
    fn tokens_are_not_shown() {
        let p = Profile {
            region: Region::Other,
            url: "u".into(),
            pat: "secret".into(),
        };
        assert!(!format!("{p:?}").contains("secret"));
    }

    #[test]
    fn region_names() {
        assert_eq!("China".parse::<Region>().unwrap(), Region::China);
        assert_eq!(Region::Other.to_string(), "other");
        assert!("mars".parse::<Region>().is_err());
    }

    #[test]
    fn load_file() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "[profile.default]\nurl = \"https://x.test/graphql\"")?;
        let c: Config = helio_common::read_toml(f.path())?;
        assert_eq!(c.profile(None)?.url, "https://x.test/graphql");
        Ok(())
    }
}
