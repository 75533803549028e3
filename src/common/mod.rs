pub mod fx_hash;
