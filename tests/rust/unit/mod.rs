mod executor_tests;
mod params_tests;
mod query_tests;
