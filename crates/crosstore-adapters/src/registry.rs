//! Driver registry: the closed constructor table.
//!
//! The supported-backend set is statically enumerable: no dynamic module
//! loading. Resolution happens once, when the connection manager connects.

use crosstore_core::{Driver, StoreConfig, StoreError, StoreResult};

use crate::mongo::MongoAdapter;
use crate::mysql::MysqlAdapter;
use crate::postgres::PostgresAdapter;
use crate::redis::RedisAdapter;
use crate::sqlite::SqliteAdapter;
use crate::traits::Adapter;

type Constructor = fn(StoreConfig) -> Box<dyn Adapter>;

fn open_sqlite(config: StoreConfig) -> Box<dyn Adapter> {
    Box::new(SqliteAdapter::new(config))
}

fn open_postgres(config: StoreConfig) -> Box<dyn Adapter> {
    Box::new(PostgresAdapter::new(config))
}

fn open_mysql(config: StoreConfig) -> Box<dyn Adapter> {
    Box::new(MysqlAdapter::new(config))
}

fn open_mongodb(config: StoreConfig) -> Box<dyn Adapter> {
    Box::new(MongoAdapter::new(config))
}

fn open_redis(config: StoreConfig) -> Box<dyn Adapter> {
    Box::new(RedisAdapter::new(config))
}

static DRIVERS: &[(Driver, Constructor)] = &[
    (Driver::Sqlite, open_sqlite),
    (Driver::Postgres, open_postgres),
    (Driver::Mysql, open_mysql),
    (Driver::Mongodb, open_mongodb),
    (Driver::Redis, open_redis),
];

/// Resolve the configured driver to an adapter instance (not yet connected).
pub fn open(config: StoreConfig) -> StoreResult<Box<dyn Adapter>> {
    let driver = config.driver;
    DRIVERS
        .iter()
        .find(|(candidate, _)| *candidate == driver)
        .map(|(_, constructor)| constructor(config))
        .ok_or_else(|| StoreError::UnsupportedDriver(driver.name().to_string()))
}

/// The statically known set of supported drivers.
pub fn drivers() -> impl Iterator<Item = Driver> {
    DRIVERS.iter().map(|(driver, _)| *driver)
}
