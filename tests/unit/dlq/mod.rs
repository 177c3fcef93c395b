pub mod file_storage_test;
