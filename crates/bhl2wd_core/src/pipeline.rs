//! One request, end to end: input validation, duplicate check, metadata
//! fetch, and command generation, in that order.

use std::fmt;

use anyhow::Result;
use tracing::{info, warn};

use crate::bhl::{BhlClient, TitleMetadata, TitleSource};
use crate::config::AppConfig;
use crate::identifier::{InputRejection, TitleId, classify};
use crate::quickstatements::{CommandScript, generate, quickstatements_url};
use crate::wikidata::{EntityLookup, ExistingItem, ExistingItemLookup, SparqlClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Input(InputRejection),
    Duplicate(ExistingItem),
    NotFound { title_id: TitleId },
}

impl From<InputRejection> for Rejection {
    fn from(value: InputRejection) -> Self {
        Self::Input(value)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(rejection) => fmt::Display::fmt(rejection, f),
            Self::Duplicate(item) => {
                write!(f, "Item already exists: {} ({}).", item.label, item.qid)
            }
            Self::NotFound { .. } => f.write_str("No metadata found for this BHL Title ID."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub metadata: TitleMetadata,
    pub script: CommandScript,
}

impl Generated {
    pub fn quickstatements(&self) -> String {
        self.script.render()
    }

    pub fn quickstatements_url(&self) -> String {
        quickstatements_url(&self.script.render())
    }
}

/// Result of one request. Generation and duplicate reporting are exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Generated(Box<Generated>),
    Rejected(Rejection),
}

pub struct Pipeline<'a> {
    titles: &'a dyn TitleSource,
    existing: &'a dyn ExistingItemLookup,
    entities: &'a dyn EntityLookup,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        titles: &'a dyn TitleSource,
        existing: &'a dyn ExistingItemLookup,
        entities: &'a dyn EntityLookup,
    ) -> Self {
        Self {
            titles,
            existing,
            entities,
        }
    }

    pub fn run(&self, input: &str) -> Outcome {
        let title_id = match classify(input) {
            Ok(title_id) => title_id,
            Err(rejection) => {
                info!(input = input.trim(), "input rejected: {rejection}");
                return Outcome::Rejected(rejection.into());
            }
        };

        if let Some(item) = self.check_existing(&title_id) {
            info!(title_id = %title_id, qid = %item.qid, "Wikidata item already exists");
            return Outcome::Rejected(Rejection::Duplicate(item));
        }

        let metadata = match self.titles.fetch_title(&title_id) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                info!(title_id = %title_id, "BHL has no record for title");
                return Outcome::Rejected(Rejection::NotFound { title_id });
            }
            Err(error) => {
                warn!(title_id = %title_id, "BHL metadata fetch failed: {error:#}");
                return Outcome::Rejected(Rejection::NotFound { title_id });
            }
        };

        let script = generate(&metadata, self.entities);
        info!(
            title_id = %title_id,
            commands = script.lines().len(),
            unresolved_authors = script.diagnostics().len(),
            "generated QuickStatements"
        );
        Outcome::Generated(Box::new(Generated { metadata, script }))
    }

    /// Duplicate check fails open: a broken query never blocks generation.
    pub fn check_existing(&self, title_id: &TitleId) -> Option<ExistingItem> {
        match self.existing.find_existing(title_id) {
            Ok(item) => item,
            Err(error) => {
                warn!(title_id = %title_id, "duplicate check failed, continuing: {error:#}");
                None
            }
        }
    }
}

/// Production adapters built from an [`AppConfig`].
pub struct LiveServices {
    bhl: BhlClient,
    sparql: SparqlClient,
}

impl LiveServices {
    pub fn connect(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            bhl: BhlClient::new(config)?,
            sparql: SparqlClient::new(config)?,
        })
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.bhl, &self.sparql, &self.sparql)
    }
}
