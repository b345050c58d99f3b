//! Plugin, device, resource and fabric queries.

use fleetgate_core::db::unix_timestamp;

use super::db::{AggregatorDatabase, DatabaseError};
use super::models::{AuthMode, Device, Fabric, Plugin, ResourceRecord};

/// Parameters for registering a plugin.
pub struct NewPlugin<'a> {
    pub id: &'a str,
    pub address: &'a str,
    pub auth_mode: AuthMode,
    pub username: &'a str,
    pub password: &'a [u8],
}

/// Parameters for registering a device.
pub struct NewDevice<'a> {
    pub uuid: &'a str,
    pub manager_address: &'a str,
    pub username: &'a str,
    pub password: &'a [u8],
    pub plugin_id: &'a str,
}

impl AggregatorDatabase {
    // =========================================================================
    // Plugin queries
    // =========================================================================

    pub async fn create_plugin(&self, params: &NewPlugin<'_>) -> Result<Plugin, DatabaseError> {
        sqlx::query(
            "INSERT INTO plugins (id, address, preferred_auth, username, password, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.address)
        .bind(params.auth_mode.as_str())
        .bind(params.username)
        .bind(params.password)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_plugin(params.id).await
    }

    pub async fn get_plugin(&self, id: &str) -> Result<Plugin, DatabaseError> {
        sqlx::query_as::<_, Plugin>("SELECT * FROM plugins WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Plugin {id}")))
    }

    // =========================================================================
    // Device queries
    // =========================================================================

    pub async fn create_device(&self, params: &NewDevice<'_>) -> Result<Device, DatabaseError> {
        sqlx::query(
            "INSERT INTO devices (uuid, manager_address, username, password, plugin_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(params.uuid)
        .bind(params.manager_address)
        .bind(params.username)
        .bind(params.password)
        .bind(params.plugin_id)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_device(params.uuid).await
    }

    pub async fn get_device(&self, uuid: &str) -> Result<Device, DatabaseError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {uuid}")))
    }

    /// All registered devices, oldest first.
    pub async fn list_devices(&self) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices ORDER BY created_at ASC, uuid ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(devices)
    }

    // =========================================================================
    // Resource inventory queries
    // =========================================================================

    /// Insert or replace the cached body of a resource.
    pub async fn upsert_resource(
        &self,
        url: &str,
        table_name: &str,
        device_uuid: Option<&str>,
        body: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO resources (url, table_name, device_uuid, body, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(url) DO UPDATE SET table_name = excluded.table_name,
                device_uuid = excluded.device_uuid, body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(url)
        .bind(table_name)
        .bind(device_uuid)
        .bind(body)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Store every `(url, table_name, body)` of one device in a single
    /// transaction, skipping URLs already present. Returns the URLs written.
    pub async fn insert_device_resources(
        &self,
        device_uuid: &str,
        resources: &[(String, String, String)],
    ) -> Result<Vec<String>, DatabaseError> {
        let mut tx = self.pool().begin().await?;
        let now = unix_timestamp();
        let mut written = Vec::new();
        for (url, table_name, body) in resources {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO resources (url, table_name, device_uuid, body, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(url)
            .bind(table_name)
            .bind(device_uuid)
            .bind(body)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                written.push(url.clone());
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn get_resource(&self, url: &str) -> Result<ResourceRecord, DatabaseError> {
        sqlx::query_as::<_, ResourceRecord>("SELECT * FROM resources WHERE url = ?")
            .bind(url)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Resource {url}")))
    }

    /// Every record of one resource table, ordered by URL.
    pub async fn list_resources_by_table(
        &self,
        table_name: &str,
    ) -> Result<Vec<ResourceRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, ResourceRecord>(
            "SELECT * FROM resources WHERE table_name = ? ORDER BY url ASC",
        )
        .bind(table_name)
        .fetch_all(self.pool())
        .await?;
        Ok(records)
    }

    /// Number of cached resources that belong to a device.
    pub async fn count_resources_for_device(
        &self,
        device_uuid: &str,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resources WHERE device_uuid = ?")
            .bind(device_uuid)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    // =========================================================================
    // Fabric queries
    // =========================================================================

    pub async fn create_fabric(
        &self,
        fabric_uuid: &str,
        plugin_id: &str,
    ) -> Result<Fabric, DatabaseError> {
        sqlx::query("INSERT INTO fabrics (fabric_uuid, plugin_id) VALUES (?, ?)")
            .bind(fabric_uuid)
            .bind(plugin_id)
            .execute(self.pool())
            .await?;
        self.get_fabric(fabric_uuid).await
    }

    pub async fn get_fabric(&self, fabric_uuid: &str) -> Result<Fabric, DatabaseError> {
        sqlx::query_as::<_, Fabric>("SELECT * FROM fabrics WHERE fabric_uuid = ?")
            .bind(fabric_uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Fabric {fabric_uuid}")))
    }

    pub async fn list_fabrics(&self) -> Result<Vec<Fabric>, DatabaseError> {
        let fabrics = sqlx::query_as::<_, Fabric>("SELECT * FROM fabrics ORDER BY fabric_uuid ASC")
            .fetch_all(self.pool())
            .await?;
        Ok(fabrics)
    }
}
