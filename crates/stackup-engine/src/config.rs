use stackup_domain::{ConfigOverrides, EnvironmentConfig, VpcCidr};

use crate::error::ConfigError;

pub const DEFAULT_PLATFORM_VERSION: &str = "1.29";
pub const FALLBACK_REGION: &str = "us-east-1";
pub const FALLBACK_ENVIRONMENT: &str = "dev";

/// One row of the per-environment defaults table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentDefaults {
    pub name: &'static str,
    pub instance_class: &'static str,
    pub node_count: u32,
    pub vpc_cidr: &'static str,
    pub region: &'static str,
}

pub const DEFAULTS_TABLE: &[EnvironmentDefaults] = &[
    EnvironmentDefaults {
        name: "dev",
        instance_class: "t3.medium",
        node_count: 2,
        vpc_cidr: "10.0.0.0/16",
        region: "us-west-2",
    },
    EnvironmentDefaults {
        name: "staging",
        instance_class: "m5.large",
        node_count: 3,
        vpc_cidr: "10.1.0.0/16",
        region: "us-west-2",
    },
    EnvironmentDefaults {
        name: "prod",
        instance_class: "m5.xlarge",
        node_count: 5,
        vpc_cidr: "10.2.0.0/16",
        region: "us-east-1",
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownEnvironmentPolicy {
    /// Resolve unknown names with the fallback row.
    #[default]
    FallBack,
    Reject,
}

/// Result of resolving configuration, with any non-fatal notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub config: EnvironmentConfig,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfigResolver<'a> {
    table: &'a [EnvironmentDefaults],
    fallback: &'a str,
    policy: UnknownEnvironmentPolicy,
}

impl Default for ConfigResolver<'static> {
    fn default() -> Self {
        Self::new(DEFAULTS_TABLE)
    }
}

impl<'a> ConfigResolver<'a> {
    #[must_use]
    pub const fn new(table: &'a [EnvironmentDefaults]) -> Self {
        Self {
            table,
            fallback: FALLBACK_ENVIRONMENT,
            policy: UnknownEnvironmentPolicy::FallBack,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: UnknownEnvironmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_fallback(mut self, fallback: &'a str) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn lookup(&self, environment: &str) -> Option<&'a EnvironmentDefaults> {
        self.table.iter().find(|row| row.name == environment)
    }

    /// Region to use when none was supplied: the environment's row, then the
    /// fallback row, then [`FALLBACK_REGION`].
    #[must_use]
    pub fn default_region(&self, environment: &str) -> &'a str {
        self.lookup(environment.trim())
            .or_else(|| self.lookup(self.fallback))
            .map_or(FALLBACK_REGION, |row| row.region)
    }

    /// Resolve a validated configuration from raw inputs and overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending field when the
    /// environment or region is blank, the node count is zero, the VPC CIDR
    /// is malformed, or the environment is unknown under
    /// [`UnknownEnvironmentPolicy::Reject`].
    pub fn resolve(
        &self,
        environment: &str,
        region: &str,
        overrides: &ConfigOverrides,
    ) -> std::result::Result<ResolvedConfig, ConfigError> {
        let environment = environment.trim();
        if environment.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "environment",
            });
        }
        let region = region.trim();
        if region.is_empty() {
            return Err(ConfigError::EmptyField { field: "region" });
        }

        let mut warnings = Vec::new();
        let defaults = match self.lookup(environment) {
            Some(row) => Some(row),
            None => {
                if self.policy == UnknownEnvironmentPolicy::Reject {
                    return Err(ConfigError::UnknownEnvironment {
                        environment: environment.to_string(),
                        known: self.known_names(),
                    });
                }
                warnings.push(format!(
                    "environment \"{environment}\" has no defaults; using \"{}\" defaults",
                    self.fallback
                ));
                self.lookup(self.fallback)
            }
        };

        let node_count = overrides
            .node_count
            .or_else(|| defaults.map(|row| row.node_count))
            .unwrap_or(1);
        if node_count < 1 {
            return Err(ConfigError::NodeCountTooSmall { value: node_count });
        }

        let vpc_cidr = match overrides.vpc_cidr.as_deref() {
            Some(raw) => Some(raw),
            None => defaults.map(|row| row.vpc_cidr),
        }
        .map(VpcCidr::parse)
        .transpose()
        .map_err(|source| ConfigError::InvalidVpcCidr { source })?;

        let platform_version = non_blank(overrides.platform_version.as_deref())
            .unwrap_or(DEFAULT_PLATFORM_VERSION)
            .to_string();
        let instance_class = non_blank(overrides.instance_class.as_deref())
            .or_else(|| defaults.map(|row| row.instance_class))
            .map(str::to_string);
        let account = non_blank(overrides.account.as_deref()).map(str::to_string);

        let profile = defaults.map_or_else(|| self.fallback.to_string(), |row| row.name.to_string());

        log::debug!("resolved configuration for {environment}/{region} using {profile} defaults");

        Ok(ResolvedConfig {
            config: EnvironmentConfig {
                environment: environment.to_string(),
                region: region.to_string(),
                account,
                profile,
                vpc_cidr,
                platform_version,
                instance_class,
                node_count,
            },
            warnings,
        })
    }

    fn known_names(&self) -> String {
        self.table
            .iter()
            .map(|row| row.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
