pub mod live_results;
