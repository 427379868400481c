//! Whole-scope question answering
//!
//! A scope (a course, a project) is a list of units, each linked to one or
//! more documents. The map step turns each linked document's precomputed
//! summary into a short evidence note; the reduce step writes one answer
//! from all notes. The report records which documents and units contributed.

mod classify;
mod generate;

pub use classify::*;
pub use generate::*;

use crate::error::{Error, Result};
use crate::meta::{DocAssets, Document, MetaDb};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SNIPPET_CHARS: usize = 240;
const NO_EVIDENCE_ANSWER: &str = "None of the documents in this scope have been summarized yet, \
     so there is no evidence to answer from.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCoverage {
    pub unit_id: String,
    pub title: String,
    pub doc_ids: Vec<String>,
    /// Linked documents that produced an evidence note
    pub evidence_docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub scope: String,
    pub included_docs: Vec<String>,
    /// Linked documents without a usable summary
    pub missing_docs: Vec<String>,
    /// Units none of whose documents produced evidence
    pub missing_units: Vec<String>,
    pub per_unit: Vec<UnitCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub coverage: CoverageReport,
}

struct EvidenceNote {
    doc_id: String,
    title: String,
    note: String,
    summary: String,
}

/// Truncate to at most `max_chars` characters, marking the cut
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

pub struct CoverageEngine {
    db: MetaDb,
    generator: Arc<dyn Generator>,
    chars_per_token: usize,
}

impl CoverageEngine {
    pub fn new(db: MetaDb, generator: Arc<dyn Generator>, chars_per_token: usize) -> Self {
        Self {
            db,
            generator,
            chars_per_token: chars_per_token.max(1),
        }
    }

    fn char_budget(&self, tokens: usize) -> usize {
        tokens.saturating_mul(self.chars_per_token)
    }

    pub async fn coverage_query(
        &self,
        workspace: &str,
        scope_id: &str,
        query: &str,
        map_budget: usize,
        reduce_budget: usize,
    ) -> Result<CoverageAnswer> {
        let units = self.db.list_scope_units(workspace, scope_id).await?;
        if units.is_empty() {
            return Err(Error::retrieval(format!(
                "Scope '{}' has no units in workspace '{}'",
                scope_id, workspace
            )));
        }

        // a document linked from several units is mapped once
        let mut mapped: HashMap<String, Option<usize>> = HashMap::new();
        let mut notes: Vec<EvidenceNote> = Vec::new();
        let mut report = CoverageReport {
            scope: scope_id.to_string(),
            included_docs: Vec::new(),
            missing_docs: Vec::new(),
            missing_units: Vec::new(),
            per_unit: Vec::with_capacity(units.len()),
        };

        for unit in units {
            let doc_ids = self.db.list_unit_documents(&unit.id).await?;
            let mut evidence_docs = Vec::new();

            for doc_id in &doc_ids {
                let slot = match mapped.get(doc_id).copied() {
                    Some(slot) => slot,
                    None => {
                        let slot = match self.load_evidence_source(workspace, doc_id).await? {
                            Some((doc, assets)) => {
                                let note = self
                                    .map_document(query, &doc, &assets, map_budget)
                                    .await?;
                                report.included_docs.push(doc_id.clone());
                                notes.push(EvidenceNote {
                                    doc_id: doc_id.clone(),
                                    title: doc.display_name().to_string(),
                                    note,
                                    summary: assets.summary_text,
                                });
                                Some(notes.len() - 1)
                            }
                            None => {
                                report.missing_docs.push(doc_id.clone());
                                None
                            }
                        };
                        mapped.insert(doc_id.clone(), slot);
                        slot
                    }
                };
                if slot.is_some() {
                    evidence_docs.push(doc_id.clone());
                }
            }

            if evidence_docs.is_empty() {
                report.missing_units.push(unit.id.clone());
            }
            report.per_unit.push(UnitCoverage {
                unit_id: unit.id,
                title: unit.title,
                doc_ids,
                evidence_docs,
            });
        }

        info!(
            workspace = %workspace,
            scope = %scope_id,
            included = report.included_docs.len(),
            missing_docs = report.missing_docs.len(),
            missing_units = report.missing_units.len(),
            "Coverage map finished"
        );

        let answer = if notes.is_empty() {
            NO_EVIDENCE_ANSWER.to_string()
        } else {
            self.reduce(query, &notes, reduce_budget).await?
        };

        let citations = notes
            .iter()
            .map(|n| Citation {
                doc_id: n.doc_id.clone(),
                title: n.title.clone(),
                snippet: truncate_chars(&n.summary, SNIPPET_CHARS),
            })
            .collect();

        Ok(CoverageAnswer {
            answer,
            citations,
            coverage: report,
        })
    }

    /// A live document of this workspace with usable assets
    async fn load_evidence_source(
        &self,
        workspace: &str,
        doc_id: &str,
    ) -> Result<Option<(Document, DocAssets)>> {
        let Some(doc) = self
            .db
            .get_document(doc_id)
            .await?
            .filter(|d| d.workspace_id == workspace)
        else {
            debug!(doc_id = %doc_id, "Linked document not found");
            return Ok(None);
        };
        let assets = self
            .db
            .get_doc_assets(doc_id)
            .await?
            .filter(DocAssets::is_usable);
        Ok(assets.map(|a| (doc, a)))
    }

    async fn map_document(
        &self,
        query: &str,
        doc: &Document,
        assets: &DocAssets,
        budget: usize,
    ) -> Result<String> {
        let mut prompt = format!(
            "Extract the evidence relevant to the question from this document summary. \
             Answer in a few sentences and say so if nothing is relevant.\n\n\
             Question: {}\nDocument: {}\nSummary: {}\n",
            query,
            doc.display_name(),
            assets.summary_text
        );
        if !assets.outline.is_empty() {
            prompt.push_str(&format!("Outline: {}\n", assets.outline.join("; ")));
        }
        if !assets.entities.is_empty() {
            prompt.push_str(&format!("Key terms: {}\n", assets.entities.join(", ")));
        }

        match self.generator.generate(&prompt, budget).await {
            Ok(note) => Ok(truncate_chars(&note, self.char_budget(budget))),
            Err(e) if e.is_configuration() => {
                debug!(doc_id = %doc.id, "Generation unavailable, using summary as evidence");
                Ok(truncate_chars(&assets.summary_text, self.char_budget(budget)))
            }
            Err(e) => Err(e),
        }
    }

    async fn reduce(&self, query: &str, notes: &[EvidenceNote], budget: usize) -> Result<String> {
        let context = notes
            .iter()
            .map(|n| format!("- [{}] {}", n.title, n.note))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Answer the question using only the evidence notes below. \
             Cover every document that is relevant and cite document titles in brackets.\n\n\
             Question: {}\n\nEvidence:\n{}\n",
            query, context
        );

        match self.generator.generate(&prompt, budget).await {
            Ok(answer) => Ok(answer),
            Err(e) if e.is_configuration() => {
                warn!("Generation unavailable, answering with raw evidence");
                Ok(truncate_chars(&context, self.char_budget(budget)))
            }
            Err(e) => Err(e),
        }
    }
}
