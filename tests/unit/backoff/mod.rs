pub mod backoff_test;
