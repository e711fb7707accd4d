use clap::{ArgAction, Parser};
use copy_common::{CopyConfig, TableEndpoint};

/// Command line of `dynamodb-copy`.
#[derive(Debug, Parser)]
#[command(
    name = "dynamodb-copy",
    version,
    about = "Copy one DynamoDB table into another within a throughput budget"
)]
pub struct Cli {
    /// Endpoint of the source table (host or URL).
    #[arg(long, alias = "sourceEndpoint", value_name = "ENDPOINT")]
    pub source_endpoint: Option<String>,
    /// Name of the source table.
    #[arg(long, alias = "sourceTable", value_name = "TABLE")]
    pub source_table: String,
    /// Endpoint of the destination table (host or URL).
    #[arg(long, alias = "destinationEndpoint", value_name = "ENDPOINT")]
    pub destination_endpoint: Option<String>,
    /// Name of the destination table.
    #[arg(long, alias = "destinationTable", value_name = "TABLE")]
    pub destination_table: String,
    /// Fraction of the source read capacity to consume.
    #[arg(long, alias = "readThroughputRatio", default_value_t = 0.5)]
    pub read_throughput_ratio: f64,
    /// Fraction of the destination write capacity to consume.
    #[arg(long, alias = "writeThroughputRatio", default_value_t = 0.5)]
    pub write_throughput_ratio: f64,
    /// Fixed units per second for both sides; overrides the ratios (0 = unset).
    #[arg(long, alias = "throughputRate")]
    pub throughput_rate: Option<f64>,
    /// Maximum number of write threads.
    #[arg(long, alias = "maxWriteThreads", default_value_t = 64)]
    pub max_write_threads: usize,
    /// Use strongly consistent reads while scanning.
    #[arg(long, alias = "consistentScan")]
    pub consistent_scan: bool,
    /// Load each side's credentials from its own profile.
    #[arg(long, alias = "crossAccount")]
    pub cross_account: bool,
    /// Credential profile of the source account.
    #[arg(long, alias = "sourceProfile", value_name = "PROFILE")]
    pub source_profile: Option<String>,
    /// Credential profile of the destination account.
    #[arg(long, alias = "destinationProfile", value_name = "PROFILE")]
    pub destination_profile: Option<String>,
    /// Section of the segment space handled by this process.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub section: i64,
    /// Number of cooperating processes.
    #[arg(long, alias = "totalSections", default_value_t = 1, allow_hyphen_values = true)]
    pub total_sections: i64,
    /// Print the job report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Builds the job parameters.
    pub fn to_config(&self) -> CopyConfig {
        CopyConfig {
            source: TableEndpoint {
                endpoint: self.source_endpoint.clone(),
                table: self.source_table.clone(),
                profile: self.source_profile.clone(),
            },
            destination: TableEndpoint {
                endpoint: self.destination_endpoint.clone(),
                table: self.destination_table.clone(),
                profile: self.destination_profile.clone(),
            },
            read_throughput_ratio: self.read_throughput_ratio,
            write_throughput_ratio: self.write_throughput_ratio,
            throughput_rate: self.throughput_rate.filter(|&rate| rate != 0.0),
            max_write_threads: self.max_write_threads,
            consistent_scan: self.consistent_scan,
            cross_account: self.cross_account,
            section: self.section,
            total_sections: self.total_sections,
        }
    }

    /// Default log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "dynamodb_copy=debug,copy_worker=debug,copy_planner=debug,copy_common=debug,info",
            2 => "debug",
            _ => "trace",
        }
    }
}
