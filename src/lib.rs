pub mod config;
pub mod db;
pub mod docx;
pub mod error;
pub mod extract;
pub mod generation;
pub mod html;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod request_user;
pub mod routes;
pub mod s3;
pub mod sanitize;
pub mod schema;
pub mod state;
pub mod storage;
