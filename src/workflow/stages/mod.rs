//! Stage implementations. Each takes the run state by value and returns the next one.

mod accumulate;
mod collect;
mod diagnose;
mod retrieve;
mod store;
