pub mod api_types;
pub mod kv;
pub mod llm_provider;
pub mod routes;
pub mod schema_source;
pub mod state;
