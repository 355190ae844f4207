use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::client::ExtractionClient;
use crate::error::AskError;
use crate::formatter::{ExtractionResult, ResponseFormatter};
use crate::schema::SchemaBuilder;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TurnOutcome {
    Answered(ExtractionResult),
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub id: Uuid,
    pub url: String,
    pub query: String,
    pub asked_at: DateTime<Utc>,
    pub outcome: TurnOutcome,
}

impl ChatTurn {
    pub fn result(&self) -> Option<&ExtractionResult> {
        match &self.outcome {
            TurnOutcome::Answered(result) => Some(result),
            TurnOutcome::Failed { .. } => None,
        }
    }
}

/// Ordered log of questions asked about a website and what came back.
#[derive(Debug, Default)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
    formatter: ResponseFormatter,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn formatter(&self) -> &ResponseFormatter {
        &self.formatter
    }

    /// Run one extraction for `query` against `url` and record the turn.
    /// Failures are recorded too, with their message, before being returned.
    pub async fn ask<C>(
        &mut self,
        url: &str,
        query: &str,
        client: &C,
        schema: &SchemaBuilder,
    ) -> Result<ExtractionResult, AskError>
    where
        C: ExtractionClient + ?Sized,
    {
        let contract = schema.compile();
        let outcome = match client.extract(url, query, contract.as_ref()).await {
            Ok(raw) => self
                .formatter
                .to_table(&raw, contract.as_ref())
                .map(|table| ExtractionResult { table, raw })
                .map_err(AskError::from),
            Err(e) => Err(AskError::from(e)),
        };

        let recorded = match &outcome {
            Ok(result) => TurnOutcome::Answered(result.clone()),
            Err(e) => {
                tracing::warn!(url, error = %e, "Extraction turn failed");
                TurnOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        self.turns.push(ChatTurn {
            id: Uuid::new_v4(),
            url: url.to_string(),
            query: query.to_string(),
            asked_at: Utc::now(),
            outcome: recorded,
        });

        outcome
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn turn(&self, id: Uuid) -> Option<&ChatTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// Most recent successful answer
    pub fn latest_result(&self) -> Option<&ExtractionResult> {
        self.turns.iter().rev().find_map(ChatTurn::result)
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}
