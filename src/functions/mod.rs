pub mod correlation;
pub mod kmer_counter;
pub mod pool;
pub mod sequence_source;
pub mod table_codec;
pub mod zscore;
