mod caching;
mod documents;
mod scheduling;
mod utils;
