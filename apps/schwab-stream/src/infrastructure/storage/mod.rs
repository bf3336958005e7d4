//! Durable Storage
//!
//! Day-partitioned Parquet implementation of the `QuoteLog` and
//! `PartitionReader` ports.

mod partitions;

pub use partitions::{
    ParquetPartitionReader, ParquetQuoteLog, PartitionError, partition_date, partition_path,
    read_partition_file,
};
