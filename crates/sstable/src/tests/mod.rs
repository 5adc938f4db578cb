pub mod helpers;

mod cache_tests;
