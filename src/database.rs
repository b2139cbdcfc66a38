use clap::ValueEnum;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Database {
    #[cfg(feature = "ravendb")]
    Ravendb,
    /// In-process store, for dry runs of the driver
    Memory,
}
