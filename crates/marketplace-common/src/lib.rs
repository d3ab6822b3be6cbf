pub mod error;
pub mod llm;
pub mod model;
pub mod normalize;
pub mod redis;
pub mod search;
pub mod similarity;
pub mod supabase;
