//! Property-based tests for fingerprint determinism and usage accounting
