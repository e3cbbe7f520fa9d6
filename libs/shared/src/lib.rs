//! # Shared — 横断ユーティリティ層
//!
//! 設定読み込みなど、アプリとライブラリの双方から使う部品を置く。

pub mod config;
