pub mod config;
pub mod logging;

pub mod captcha;
pub mod control;
pub mod downloader;
pub mod engine;
pub mod health;
pub mod html;
pub mod http;
pub mod proxy;
pub mod resolver;
pub mod resume_db;
pub mod retry;
pub mod segmenter;
pub mod storage;
pub mod url_model;
