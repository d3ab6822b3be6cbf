/// Error types shared by the marketplace service crates.
///
/// These cover the external collaborators (LLM providers, Supabase). The pure
/// components in `search` and `normalize` never fail, and Redis degrades to a
/// no-op instead of erroring. Application-level errors live in the API crate
/// and wrap `CommonError` via `#[from]`.
use crate::llm::LlmError;
use crate::supabase::SupabaseError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("supabase error: {0}")]
    Supabase(#[from] SupabaseError),
}
