//! The `ZonoChat` step catalog: tenancy backfill, channel columns and
//! optional channel seeds.
//!
//! Versioned SQL files run first (they usually carry the base schema), then
//! the built-in steps in a fixed order. Each built-in step only touches what
//! its check found missing.

use crate::backfill::{BackfillQuery, DefaultValue};
use crate::ident::Ident;
use crate::step::MigrationStep;
use crate::steps::{AddColumnStep, BackfillStep, CreateTableStep, EnsureRowStep, SqlFileStep};
use sea_orm::Value;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CREATE_TENANTS: &str = "create_tenants_table";
pub const SEED_DEFAULT_TENANT: &str = "seed_default_tenant";
pub const ADD_USERS_TENANT_ID: &str = "add_users_tenant_id";
pub const BACKFILL_USERS_TENANT_ID: &str = "backfill_users_tenant_id";
pub const ADD_CONTACTS_CHANNEL: &str = "add_contacts_channel";
pub const ADD_TICKETS_CHANNEL: &str = "add_tickets_channel";
pub const ADD_TICKETS_CHANNEL_ID: &str = "add_tickets_channel_id";

const BASE_SCHEMA_GUIDANCE: &str = "apply the base schema (SQL files) first";

/// Tenant assigned to rows created before tenancy existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenancyConfig {
    pub default_tenant_id: i32,
    pub default_tenant_name: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_tenant_id: 1,
            default_tenant_name: "Demo".to_owned(),
        }
    }
}

/// Messaging channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelType {
    Whatsapp,
    Messenger,
    Instagram,
    Email,
    Web,
    Telegram,
    Other,
}

impl ChannelType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Messenger => "messenger",
            Self::Instagram => "instagram",
            Self::Email => "email",
            Self::Web => "web",
            Self::Telegram => "telegram",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CHANNEL_TYPE_NAMES: &str = "whatsapp, messenger, instagram, email, web, telegram, other";

#[derive(Debug, thiserror::Error)]
#[error("unknown channel type '{0}' (expected one of {names})", names = CHANNEL_TYPE_NAMES)]
pub struct UnknownChannelType(String);

impl FromStr for ChannelType {
    type Err = UnknownChannelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::Whatsapp),
            "messenger" => Ok(Self::Messenger),
            "instagram" => Ok(Self::Instagram),
            "email" => Ok(Self::Email),
            "web" => Ok(Self::Web),
            "telegram" => Ok(Self::Telegram),
            "other" => Ok(Self::Other),
            _ => Err(UnknownChannelType(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ChannelType {
    type Error = UnknownChannelType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelType> for String {
    fn from(value: ChannelType) -> Self {
        value.as_str().to_owned()
    }
}

/// A channel to create if no channel with the same type and identifier exists.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSeed {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Phone number, page id, mailbox address and so on.
    pub identifier: String,
    #[serde(default, skip_serializing)]
    pub access_token: Option<SecretString>,
    #[serde(default, skip_serializing)]
    pub webhook_verify_token: Option<SecretString>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ChannelSeed {
    /// Ledger name of the step seeding this channel.
    #[must_use]
    pub fn step_name(&self) -> String {
        format!("seed_channel:{}:{}", self.channel_type, self.identifier)
    }
}

/// Built-in `ZonoChat` steps, in apply order.
#[must_use]
pub fn builtin_steps(
    tenancy: &TenancyConfig,
    channels: &[ChannelSeed],
) -> Vec<Box<dyn MigrationStep>> {
    let tenants = Ident::known("tenants");
    let users = Ident::known("users");
    let contacts = Ident::known("contacts");
    let tickets = Ident::known("tickets");
    let tenant_id = Ident::known("tenant_id");
    let channel = Ident::known("channel");
    let default_tenant = Value::from(tenancy.default_tenant_id);

    let mut steps: Vec<Box<dyn MigrationStep>> = vec![
        Box::new(CreateTableStep::new(
            CREATE_TENANTS,
            tenants.clone(),
            "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
        )),
        Box::new(
            EnsureRowStep::new(
                SEED_DEFAULT_TENANT,
                tenants.clone(),
                vec![(Ident::id(), default_tenant.clone())],
            )
            .value(Ident::known("name"), tenancy.default_tenant_name.as_str())
            .with_guidance(format!("run '{CREATE_TENANTS}' first")),
        ),
        Box::new(
            AddColumnStep::new(
                ADD_USERS_TENANT_ID,
                users.clone(),
                tenant_id.clone(),
                "INTEGER NULL",
            )
            .with_guidance(BASE_SCHEMA_GUIDANCE),
        ),
        Box::new(BackfillStep::new(
            BACKFILL_USERS_TENANT_ID,
            BackfillQuery::new(
                users,
                tenant_id,
                DefaultValue::Reference {
                    table: tenants,
                    column: Ident::id(),
                    value: default_tenant,
                },
            )
            .with_guidance(format!(
                "run the prior migration first ('{ADD_USERS_TENANT_ID}', '{SEED_DEFAULT_TENANT}')"
            )),
        )),
        Box::new(
            AddColumnStep::new(ADD_CONTACTS_CHANNEL, contacts, channel.clone(), "VARCHAR(32) NULL")
                .with_guidance(BASE_SCHEMA_GUIDANCE),
        ),
        Box::new(
            AddColumnStep::new(ADD_TICKETS_CHANNEL, tickets.clone(), channel, "VARCHAR(32) NULL")
                .with_guidance(BASE_SCHEMA_GUIDANCE),
        ),
        Box::new(
            AddColumnStep::new(
                ADD_TICKETS_CHANNEL_ID,
                tickets,
                Ident::known("channel_id"),
                "INTEGER NULL",
            )
            .with_guidance(BASE_SCHEMA_GUIDANCE),
        ),
    ];

    steps.extend(
        channels
            .iter()
            .map(|seed| Box::new(channel_seed_step(seed)) as Box<dyn MigrationStep>),
    );
    steps
}

fn channel_seed_step(seed: &ChannelSeed) -> EnsureRowStep {
    let secret = |s: Option<&SecretString>| s.map(|v| v.expose_secret().to_owned());
    EnsureRowStep::new(
        seed.step_name(),
        Ident::known("channels"),
        vec![
            (Ident::known("type"), seed.channel_type.as_str().into()),
            (Ident::known("identifier"), seed.identifier.as_str().into()),
        ],
    )
    .value(Ident::known("name"), seed.name.as_str())
    .value(Ident::known("access_token"), secret(seed.access_token.as_ref()))
    .value(
        Ident::known("webhook_verify_token"),
        secret(seed.webhook_verify_token.as_ref()),
    )
    .value(Ident::known("is_active"), seed.is_active)
    .with_guidance(BASE_SCHEMA_GUIDANCE)
}

/// Full plan: SQL files in file-name order, then the built-in steps.
#[must_use]
pub fn assemble(
    sql_files: Vec<SqlFileStep>,
    builtins: Vec<Box<dyn MigrationStep>>,
) -> Vec<Box<dyn MigrationStep>> {
    sql_files
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn MigrationStep>)
        .chain(builtins)
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn channel_type_parses_case_insensitively() {
        assert_eq!("WhatsApp".parse::<ChannelType>().unwrap(), ChannelType::Whatsapp);
        assert_eq!(" telegram ".parse::<ChannelType>().unwrap(), ChannelType::Telegram);
        assert!("fax".parse::<ChannelType>().is_err());
    }

    #[test]
    fn builtin_order_is_fixed() {
        let steps = builtin_steps(&TenancyConfig::default(), &[]);
        let names: Vec<_> = steps.iter().map(|s| s.name().to_owned()).collect();
        assert_eq!(
            names,
            vec![
                CREATE_TENANTS,
                SEED_DEFAULT_TENANT,
                ADD_USERS_TENANT_ID,
                BACKFILL_USERS_TENANT_ID,
                ADD_CONTACTS_CHANNEL,
                ADD_TICKETS_CHANNEL,
                ADD_TICKETS_CHANNEL_ID,
            ]
        );
    }

    #[test]
    fn channel_seeds_follow_builtins() {
        let seed = ChannelSeed {
            name: "Support WhatsApp".to_owned(),
            channel_type: ChannelType::Whatsapp,
            identifier: "+15550100".to_owned(),
            access_token: Some(SecretString::from("token".to_owned())),
            webhook_verify_token: None,
            is_active: true,
        };
        let steps = builtin_steps(&TenancyConfig::default(), std::slice::from_ref(&seed));
        assert_eq!(steps.last().unwrap().name(), "seed_channel:whatsapp:+15550100");
    }

    #[test]
    fn seed_serialization_hides_tokens() {
        let seed: ChannelSeed = serde_json::from_value(serde_json::json!({
            "name": "Web chat",
            "type": "WEB",
            "identifier": "site-1",
            "access_token": "secret-token"
        }))
        .unwrap();
        assert_eq!(seed.channel_type, ChannelType::Web);
        assert!(seed.is_active);

        let out = serde_json::to_string(&seed).unwrap();
        assert!(!out.contains("secret-token"));
        assert!(out.contains("\"type\":\"web\""));
    }
}
