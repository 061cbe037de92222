//! QuickStatements (v1 pipe syntax) generation for a new BHL title item.
//!
//! The output grammar is consumed by the external QuickStatements tool, so
//! the exact bytes matter: one command per line, `|` between fields, string
//! values in double quotes.

use std::fmt;

use tracing::warn;

use crate::bhl::TitleMetadata;
use crate::wikidata::{EntityLookup, PROP_BHL_CREATOR_ID, PROP_BHL_TITLE_ID};

pub const BIBLIOGRAPHY_URL: &str = "https://www.biodiversitylibrary.org/bibliography/";
pub const TITLE_DESCRIPTION: &str = "title in the Biodiversity Heritage Library collection";
pub const QUICKSTATEMENTS_URL: &str = "https://quickstatements.toolforge.org/#/v1=";

/// Bibliographic work.
const ITEM_BIBLIOGRAPHIC_WORK: &str = "Q47461344";
const PROP_INSTANCE_OF: &str = "P31";
const PROP_FULL_WORK_URL: &str = "P953";
const PROP_AUTHOR: &str = "P50";
const PROP_AUTHOR_NAME_STRING: &str = "P2093";
const REF_URL: &str = "S854";
const REF_STATED_AS: &str = "S1932";

/// Ordered QuickStatements commands plus notes about degraded lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    lines: Vec<String>,
    diagnostics: Vec<String>,
}

impl CommandScript {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Authors that fell back to a name string because no item was found.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }
}

impl fmt::Display for CommandScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Build the commands that create an item for `metadata`.
///
/// Each author is looked up by BHL creator ID. A hit becomes an author (P50)
/// statement referencing the item; a miss, or a failed lookup, degrades to an
/// author name string (P2093) so the script stays importable.
pub fn generate<L>(metadata: &TitleMetadata, lookup: &L) -> CommandScript
where
    L: EntityLookup + ?Sized,
{
    let mut script = CommandScript::default();
    let title_id = metadata.title_id.as_str();
    let reference = quoted(&format!("{BIBLIOGRAPHY_URL}{title_id}"));

    script.push("CREATE".to_string());
    script.push(format!("LAST|Lmul|{}", quoted(&metadata.full_title)));
    script.push(format!("LAST|Den|{}", quoted(TITLE_DESCRIPTION)));
    script.push(format!("LAST|{PROP_INSTANCE_OF}|{ITEM_BIBLIOGRAPHIC_WORK}"));
    script.push(format!("LAST|{PROP_BHL_TITLE_ID}|{}", quoted(title_id)));
    script.push(format!("LAST|{PROP_FULL_WORK_URL}|{reference}"));

    for identifier in &metadata.identifiers {
        let Some(property) = identifier_property(&identifier.name) else {
            continue;
        };
        script.push(format!(
            "LAST|{property}|{}|{REF_URL}|{reference}",
            quoted(&identifier.value.to_uppercase())
        ));
    }

    for author in &metadata.authors {
        let qid = match lookup.lookup_entity(PROP_BHL_CREATOR_ID, &author.author_id) {
            Ok(qid) => qid,
            Err(error) => {
                warn!(author_id = %author.author_id, "creator lookup failed: {error:#}");
                None
            }
        };
        match qid {
            Some(qid) => script.push(format!(
                "LAST|{PROP_AUTHOR}|{qid}|{REF_URL}|{reference}|{REF_STATED_AS}|{}",
                quoted(&author.name)
            )),
            None => {
                let note = format!(
                    "no Wikidata item found for BHL creator {} ({})",
                    author.author_id, author.name
                );
                warn!("{note}");
                script.diagnostics.push(note);
                script.push(format!(
                    "LAST|{PROP_AUTHOR_NAME_STRING}|{}|{REF_URL}|{reference}",
                    quoted(&author.name)
                ));
            }
        }
    }

    script
}

/// Link that opens QuickStatements with `commands` preloaded.
pub fn quickstatements_url(commands: &str) -> String {
    let compact = commands.replace('\t', "|").replace('\n', "||");
    format!("{QUICKSTATEMENTS_URL}{}", urlencoding::encode(&compact))
}

fn identifier_property(name: &str) -> Option<&'static str> {
    match name {
        "DOI" => Some("P356"),
        "ISSN" => Some("P236"),
        "OCLC" => Some("P243"),
        _ => None,
    }
}

/// Quote a string value.
///
/// Line breaks would split the command and a tab becomes a field separator
/// in the import URL, so both turn into spaces. `|` inside the quotes is
/// left alone.
fn quoted(value: &str) -> String {
    let single_line = value.replace(['\r', '\n', '\t'], " ");
    format!("\"{single_line}\"")
}
