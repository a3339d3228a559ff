//! # askql — ask your database a question
//!
//! > **Stop guessing column names. Ask your data.**
//!
//! askql translates natural-language questions into executable SQL using the
//! database's own schema, a growing corpus of question→SQL templates, and a
//! feedback loop that learns from corrections.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use askql::prelude::*;
//!
//! let config = AssistantConfig::default();
//! let catalog = SchemaCatalog::introspect(&pool, &config).await?;
//! let assistant = Assistant::new(catalog, config);
//!
//! let translation = assistant.translate("how many policies are active")?;
//! // => "SELECT COUNT(*) FROM policies WHERE status = ?"  params: ["ACTIVE"]
//!
//! // The user disagrees? Teach it.
//! let feedback = Feedback::new(
//!     "how many policies are active",
//!     &translation.query.sql,
//!     "SELECT COUNT(*) FROM policies WHERE status = 'ACTIVE' AND expiry_date > date('now')",
//!     Some(translation.query.template_id),
//! );
//! assistant.apply_feedback(&feedback)?;
//! ```
//!
//! ## Pipeline
//!
//! | Stage     | Component   | Function                                  |
//! |-----------|-------------|-------------------------------------------|
//! | normalize | `text`      | Tokenize and stop-filter the question     |
//! | rank      | `retriever` | TF-IDF cosine over template patterns      |
//! | extract   | `matcher`   | Schema-grounded entity extraction         |
//! | compose   | `composer`  | Bind entities into slots, render SQL      |
//! | execute   | `exec`      | Run the parameterized statement (sqlx)    |
//! | explain   | `explain`   | Structured rationale for the choice       |
//! | learn     | `feedback`  | Fold corrections back into the corpus     |

pub mod active;
pub mod catalog;
pub mod composer;
pub mod config;
pub mod demo;
pub mod error;
pub mod exec;
pub mod explain;
pub mod feedback;
pub mod matcher;
pub mod pipeline;
pub mod pmi;
pub mod retriever;
pub mod template;
pub mod text;

pub mod prelude {
    pub use crate::catalog::{SchemaCatalog, SchemaMetadata, SchemaRef};
    pub use crate::composer::{Binding, BoundValue, ComposedQuery};
    pub use crate::config::AssistantConfig;
    pub use crate::error::{AskqlError, AskqlResult};
    pub use crate::exec::{Executor, QueryResult};
    pub use crate::explain::Rationale;
    pub use crate::feedback::{Feedback, FeedbackDisposition, FeedbackOutcome};
    pub use crate::pipeline::{Assistant, Translation};
    pub use crate::template::{Template, TemplateCorpus, TemplateId};
    pub use crate::text::Question;
}
