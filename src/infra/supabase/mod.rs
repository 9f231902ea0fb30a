//! Supabase (PostgREST) implementation of [`TableStore`](crate::services::table_store::TableStore).

mod client;

pub use client::{SupabaseClient, SupabaseHttp};
