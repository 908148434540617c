#![deny(warnings)]

pub mod formula_store;

type Result<T> = anyhow::Result<T>;
