use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod api;
pub mod authority;
pub mod config;
pub mod transceiver;
pub mod types;

use crate::api::client::AuthorityClient;
use crate::api::types::LoadSet;
use crate::authority::{Authority, AuthorizationRequest};
use crate::config::Settings;
use crate::transceiver::nav::RandomNav;
use crate::transceiver::{Baseline, BlackHat, IpMulticast, QUEUE_DEPTH};
use crate::types::geo::BBox;
use crate::types::token::Token;

const DEFAULT_BBOX: (f32, f32, f32, f32) = (-71.79, 41.945, -70.57, 42.725);

#[derive(Clone, Debug, Parser)]
#[clap(name = "Squawk", author, version)]
pub struct SquawkArgs {
    /// Path to a YAML settings file
    #[clap(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Base URL of the authority
    #[clap(long, default_value = "http://localhost:8000")]
    pub url: String,

    /// Write command output to this file instead of stdout
    #[clap(long)]
    pub out: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the authority server
    Serve {
        #[clap(long, default_value = "0.0.0.0:8000")]
        listen: SocketAddr,
    },
    /// Request an authorization and print the returned load set
    Authorize {
        #[clap(long)]
        gufi: Option<Uuid>,
        /// Window start (RFC 3339); defaults to now
        #[clap(long)]
        start: Option<DateTime<Utc>>,
        /// Window end (RFC 3339); exclusive with --duration
        #[clap(long)]
        end: Option<DateTime<Utc>>,
        /// Window length in minutes
        #[clap(long)]
        duration: Option<f64>,
        /// Bounding box as west south east north
        #[clap(long, num_args = 4, value_names = ["WEST", "SOUTH", "EAST", "NORTH"], allow_negative_numbers = true)]
        bbox: Option<Vec<f32>>,
    },
    /// Fetch the load set for an authorized gufi
    Loadset { gufi: Uuid },
    /// List the fleet's conventional public keys
    TokenKeys,
    /// List the fleet's root public parameters
    MessageKeys,
    /// Run a transceiver
    Run {
        /// Load set file written by a previous authorize/loadset call
        #[clap(long)]
        loadset: Option<PathBuf>,
        #[clap(long)]
        gufi: Option<Uuid>,
        /// Request a fresh authorization of this many minutes
        #[clap(long)]
        duration: Option<f64>,
        #[clap(long, num_args = 4, value_names = ["WEST", "SOUTH", "EAST", "NORTH"], allow_negative_numbers = true)]
        bbox: Option<Vec<f32>>,
        #[clap(long, value_enum, default_value_t = Role::Baseline)]
        role: Role,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Role {
    Baseline,
    Blackhat,
}

impl SquawkArgs {
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some(path) = &self.config {
            let settings = Settings::load_from_path(path)
                .with_context(|| format!("loading settings from {}", path.display()))?;
            Settings::init(settings)?;
        }

        match self.command.clone() {
            Command::Serve { listen } => {
                let authority = Arc::new(Authority::new());
                api::server::serve(listen, authority).await
            }
            Command::Authorize {
                gufi,
                start,
                end,
                duration,
                bbox,
            } => {
                let load_set = self
                    .request_authorization(gufi, start, end, duration, bbox)
                    .await?;
                self.emit(&load_set)
            }
            Command::Loadset { gufi } => {
                let load_set = AuthorityClient::new(&self.url).load_set(gufi).await?;
                self.emit(&load_set)
            }
            Command::TokenKeys => {
                let keys = AuthorityClient::new(&self.url).token_keys().await?;
                self.emit(&keys)
            }
            Command::MessageKeys => {
                let keys = AuthorityClient::new(&self.url).message_keys().await?;
                self.emit(&keys)
            }
            Command::Run {
                loadset,
                gufi,
                duration,
                bbox,
                role,
            } => self.run_transceiver(loadset, gufi, duration, bbox, role).await,
        }
    }

    async fn request_authorization(
        &self,
        gufi: Option<Uuid>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        duration: Option<f64>,
        bbox: Option<Vec<f32>>,
    ) -> anyhow::Result<LoadSet> {
        let start = match start {
            Some(start) => start,
            None if duration.is_none() => bail!(r#"One of "start" or "duration" is required"#),
            None => Utc::now(),
        };
        let end = match (end, duration) {
            (Some(_), Some(_)) => bail!(r#"Cannot specify both "end" and "duration""#),
            (Some(end), None) => end,
            (None, Some(minutes)) => {
                start + Duration::milliseconds((minutes * 60_000.0) as i64)
            }
            (None, None) => bail!(r#"Must specify either "end" or "duration""#),
        };

        let request = AuthorizationRequest {
            gufi: gufi.unwrap_or_else(Uuid::new_v4),
            nbf: start,
            exp: end,
            bbox: parse_bbox(bbox)?,
        };
        AuthorityClient::new(&self.url).authorize(&request).await
    }

    async fn run_transceiver(
        &self,
        loadset: Option<PathBuf>,
        gufi: Option<Uuid>,
        duration: Option<f64>,
        bbox: Option<Vec<f32>>,
        role: Role,
    ) -> anyhow::Result<()> {
        let settings = Settings::global();
        let (receive_tx, receive_rx) = mpsc::channel(QUEUE_DEPTH);
        let (transmit_tx, transmit_rx) = mpsc::channel(QUEUE_DEPTH);
        let link = IpMulticast::bind(
            settings.multicast_addr,
            settings.multicast_port,
            receive_tx,
            transmit_rx,
        )?;

        match role {
            Role::Blackhat => {
                let client = AuthorityClient::new(&self.url);
                let token_keys = client.token_keys().await?;
                let message_keys = client.message_keys().await?;
                let application =
                    BlackHat::new(&token_keys, &message_keys, receive_rx, transmit_tx)?;
                transceiver::start(link, application).await
            }
            Role::Baseline => {
                let load_set = if let Some(path) = loadset {
                    serde_json::from_str(&std::fs::read_to_string(&path).with_context(|| {
                        format!("reading load set from {}", path.display())
                    })?)?
                } else if let Some(gufi) = gufi {
                    AuthorityClient::new(&self.url).load_set(gufi).await?
                } else if duration.is_some() {
                    self.request_authorization(None, None, None, duration, bbox)
                        .await?
                } else {
                    bail!("Must specify gufi, loadset, or duration");
                };

                let first_token = load_set
                    .tokens
                    .first()
                    .context("load set contains no tokens")?;
                let bbox = Token::unpack(first_token.value.as_bytes())?.payload.bbox;
                let nav = Arc::new(RandomNav::new(Some(bbox)));
                let application = Baseline::new(&load_set, nav, receive_rx, transmit_tx)?;
                transceiver::start(link, application).await
            }
        }
    }

    fn emit<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        match &self.out {
            Some(path) => std::fs::write(path, json)
                .with_context(|| format!("writing output to {}", path.display()))?,
            None => println!("{json}"),
        }
        Ok(())
    }
}

fn parse_bbox(values: Option<Vec<f32>>) -> anyhow::Result<BBox> {
    let bbox = match values {
        None => BBox::from(DEFAULT_BBOX),
        Some(values) => {
            let [west, south, east, north]: [f32; 4] = values
                .try_into()
                .map_err(|_| anyhow::anyhow!("bbox takes exactly four coordinates"))?;
            BBox::from((west, south, east, north))
        }
    };
    bbox.validate()?;
    Ok(bbox)
}
