//! Machine and spare part catalog

use serde::Deserialize;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres};

use crate::error::{AppError, AppResult};
use shared::models::{
    import_rows, CatalogFieldError, ImportReport, Machine, MachineInput, PartType, PartTypeInput,
    UserRole,
};
use shared::types::{PaginatedResponse, Pagination};

const MACHINE_COLUMNS: &str = "model, original_model, packing_speed, general_power, power_supply, \
     air_source, machine_weight, dimensions, package_material, image, added_count, original_price, \
     show_price, custom_attrs, created_at, updated_at";

const PART_COLUMNS: &str =
    "part_type_id, part_model, original_price, show_price, image, created_at, updated_at";

const MACHINE_INSERT: &str = r#"
    INSERT INTO machines (model, original_model, packing_speed, general_power, power_supply,
                          air_source, machine_weight, dimensions, package_material, image,
                          added_count, original_price, show_price, custom_attrs)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            COALESCE($11, 0), $12, $13, COALESCE($14, '{}'::jsonb))
"#;

/// `$2..$14` overwrite only when present
const MACHINE_SET: &str = r#"
    original_model = COALESCE($2, machines.original_model),
    packing_speed = COALESCE($3, machines.packing_speed),
    general_power = COALESCE($4, machines.general_power),
    power_supply = COALESCE($5, machines.power_supply),
    air_source = COALESCE($6, machines.air_source),
    machine_weight = COALESCE($7, machines.machine_weight),
    dimensions = COALESCE($8, machines.dimensions),
    package_material = COALESCE($9, machines.package_material),
    image = COALESCE($10, machines.image),
    added_count = COALESCE($11, machines.added_count),
    original_price = COALESCE($12, machines.original_price),
    show_price = COALESCE($13, machines.show_price),
    custom_attrs = COALESCE($14, machines.custom_attrs),
    updated_at = NOW()
"#;

type MachineQuery<'q> = QueryAs<'q, Postgres, Machine, PgArguments>;

/// Machine and part catalog service
#[derive(Clone)]
pub struct MachineService {
    db: PgPool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MachineFilter {
    /// Matches the model or the original model
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartFilter {
    pub part_model: Option<String>,
}

fn invalid(err: CatalogFieldError) -> AppError {
    AppError::validation(err.field, &err.to_string(), "产品目录字段无效")
}

fn bad_payload(message: &str) -> AppError {
    AppError::validation("data", message, "导入数据格式错误")
}

/// Bind `$2..$14` in `MACHINE_INSERT` column order
fn bind_machine_fields<'q>(query: MachineQuery<'q>, input: &'q MachineInput) -> MachineQuery<'q> {
    query
        .bind(&input.original_model)
        .bind(&input.packing_speed)
        .bind(&input.general_power)
        .bind(&input.power_supply)
        .bind(&input.air_source)
        .bind(&input.machine_weight)
        .bind(&input.dimensions)
        .bind(&input.package_material)
        .bind(&input.image)
        .bind(input.added_count)
        .bind(input.original_price)
        .bind(input.show_price)
        .bind(&input.custom_attrs)
}

impl MachineService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ========================================================================
    // Machines
    // ========================================================================

    pub async fn list_machines(
        &self,
        filter: &MachineFilter,
        pagination: &Pagination,
        role: UserRole,
    ) -> AppResult<PaginatedResponse<Machine>> {
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR model ILIKE '%' || $1 || '%'
                   OR original_model ILIKE '%' || $1 || '%')
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM machines {}", WHERE))
            .bind(&filter.model)
            .fetch_one(&self.db)
            .await?;

        let machines = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines {} ORDER BY model LIMIT $2 OFFSET $3",
            MACHINE_COLUMNS, WHERE
        ))
        .bind(&filter.model)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|m| m.visible_to(role))
        .collect();

        Ok(PaginatedResponse::new(machines, pagination, total))
    }

    pub async fn get_machine(&self, model: &str, role: UserRole) -> AppResult<Machine> {
        Ok(self.find_machine(model).await?.visible_to(role))
    }

    pub async fn create_machine(&self, input: MachineInput, role: UserRole) -> AppResult<Machine> {
        let input = input.normalized(true).map_err(invalid)?;
        let model = input.model.clone().unwrap_or_default();

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM machines WHERE model = $1)")
            .bind(&model)
            .fetch_one(&self.db)
            .await?;
        if exists {
            return Err(AppError::DuplicateEntry("model".to_string()));
        }

        let sql = format!("{} RETURNING {}", MACHINE_INSERT, MACHINE_COLUMNS);
        let query = sqlx::query_as::<_, Machine>(&sql).bind(&model);
        let machine = bind_machine_fields(query, &input)
            .fetch_one(&self.db)
            .await?;

        tracing::info!(model = %machine.model, "Machine created");
        Ok(machine.visible_to(role))
    }

    /// Update the given fields; the model itself is fixed
    pub async fn update_machine(
        &self,
        model: &str,
        input: MachineInput,
        role: UserRole,
    ) -> AppResult<Machine> {
        let input = input.normalized(false).map_err(invalid)?;

        let sql = format!(
            "UPDATE machines SET {} WHERE model = $1 RETURNING {}",
            MACHINE_SET, MACHINE_COLUMNS
        );
        let query = sqlx::query_as::<_, Machine>(&sql).bind(model);
        let machine = bind_machine_fields(query, &input)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Machine {}", model)))?;

        tracing::info!(model = %machine.model, "Machine updated");
        Ok(machine.visible_to(role))
    }

    pub async fn delete_machine(&self, model: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM machines WHERE model = $1")
            .bind(model)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Machine {}", model)));
        }

        tracing::info!(model = %model, "Machine deleted");
        Ok(())
    }

    /// Insert new models and update existing ones from a JSON payload
    pub async fn import_machines(&self, payload: serde_json::Value) -> AppResult<ImportReport> {
        let rows = import_rows::<MachineInput>(payload).map_err(bad_payload)?;
        let sql = format!(
            "{} ON CONFLICT (model) DO UPDATE SET {} RETURNING {}",
            MACHINE_INSERT, MACHINE_SET, MACHINE_COLUMNS
        );
        let mut report = ImportReport::default();

        for (index, row) in rows.into_iter().enumerate() {
            let input = match row {
                Ok(input) => input,
                Err(reason) => {
                    report.record_failure(index, None, reason);
                    continue;
                }
            };
            let key = input.model.clone();
            let input = match input.normalized(true) {
                Ok(input) => input,
                Err(e) => {
                    report.record_failure(index, key, e.to_string());
                    continue;
                }
            };

            let query = sqlx::query_as::<_, Machine>(&sql).bind(&input.model);
            match bind_machine_fields(query, &input).fetch_one(&self.db).await {
                Ok(_) => report.record_success(),
                Err(e) => {
                    tracing::warn!(index, model = ?key, error = %e, "Machine import row failed");
                    report.record_failure(index, key, e.to_string());
                }
            }
        }

        tracing::info!(
            imported = report.imported_count,
            failed = report.failed_count,
            "Machine import finished"
        );
        Ok(report)
    }

    pub async fn export_machines(&self, role: UserRole) -> AppResult<Vec<Machine>> {
        let machines = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines ORDER BY model",
            MACHINE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(machines.into_iter().map(|m| m.visible_to(role)).collect())
    }

    async fn find_machine(&self, model: &str) -> AppResult<Machine> {
        sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines WHERE model = $1",
            MACHINE_COLUMNS
        ))
        .bind(model)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Machine {}", model)))
    }

    // ========================================================================
    // Part types
    // ========================================================================

    pub async fn list_parts(
        &self,
        filter: &PartFilter,
        pagination: &Pagination,
        role: UserRole,
    ) -> AppResult<PaginatedResponse<PartType>> {
        const WHERE: &str = "WHERE ($1::text IS NULL OR part_model ILIKE '%' || $1 || '%')";

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM part_types {}", WHERE))
            .bind(&filter.part_model)
            .fetch_one(&self.db)
            .await?;

        let parts = sqlx::query_as::<_, PartType>(&format!(
            "SELECT {} FROM part_types {} ORDER BY part_model LIMIT $2 OFFSET $3",
            PART_COLUMNS, WHERE
        ))
        .bind(&filter.part_model)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|p| p.visible_to(role))
        .collect();

        Ok(PaginatedResponse::new(parts, pagination, total))
    }

    pub async fn get_part(&self, part_type_id: i32, role: UserRole) -> AppResult<PartType> {
        sqlx::query_as::<_, PartType>(&format!(
            "SELECT {} FROM part_types WHERE part_type_id = $1",
            PART_COLUMNS
        ))
        .bind(part_type_id)
        .fetch_optional(&self.db)
        .await?
        .map(|p| p.visible_to(role))
        .ok_or_else(|| AppError::NotFound(format!("Part type {}", part_type_id)))
    }

    pub async fn create_part(&self, input: PartTypeInput, role: UserRole) -> AppResult<PartType> {
        let input = input.normalized(true).map_err(invalid)?;
        let part_model = input.part_model.clone().unwrap_or_default();
        if self.part_model_taken(&part_model, None).await? {
            return Err(AppError::DuplicateEntry("part_model".to_string()));
        }

        let part = sqlx::query_as::<_, PartType>(&format!(
            r#"
            INSERT INTO part_types (part_model, original_price, show_price, image)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            PART_COLUMNS
        ))
        .bind(&part_model)
        .bind(input.original_price)
        .bind(input.show_price)
        .bind(&input.image)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(part_type_id = part.part_type_id, part_model = %part.part_model, "Part type created");
        Ok(part.visible_to(role))
    }

    /// Update the given fields; a new part_model must stay unique
    pub async fn update_part(
        &self,
        part_type_id: i32,
        input: PartTypeInput,
        role: UserRole,
    ) -> AppResult<PartType> {
        let input = input.normalized(false).map_err(invalid)?;
        if let Some(part_model) = &input.part_model {
            if self.part_model_taken(part_model, Some(part_type_id)).await? {
                return Err(AppError::DuplicateEntry("part_model".to_string()));
            }
        }

        let part = sqlx::query_as::<_, PartType>(&format!(
            r#"
            UPDATE part_types
            SET part_model = COALESCE($2, part_model),
                original_price = COALESCE($3, original_price),
                show_price = COALESCE($4, show_price),
                image = COALESCE($5, image),
                updated_at = NOW()
            WHERE part_type_id = $1
            RETURNING {}
            "#,
            PART_COLUMNS
        ))
        .bind(part_type_id)
        .bind(&input.part_model)
        .bind(input.original_price)
        .bind(input.show_price)
        .bind(&input.image)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Part type {}", part_type_id)))?;

        tracing::info!(part_type_id, part_model = %part.part_model, "Part type updated");
        Ok(part.visible_to(role))
    }

    pub async fn delete_part(&self, part_type_id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM part_types WHERE part_type_id = $1")
            .bind(part_type_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Part type {}", part_type_id)));
        }

        tracing::info!(part_type_id, "Part type deleted");
        Ok(())
    }

    /// Insert new part models and update existing ones from a JSON payload
    pub async fn import_parts(&self, payload: serde_json::Value) -> AppResult<ImportReport> {
        let rows = import_rows::<PartTypeInput>(payload).map_err(bad_payload)?;
        let mut report = ImportReport::default();

        for (index, row) in rows.into_iter().enumerate() {
            let input = match row {
                Ok(input) => input,
                Err(reason) => {
                    report.record_failure(index, None, reason);
                    continue;
                }
            };
            let key = input.part_model.clone();
            let input = match input.normalized(true) {
                Ok(input) => input,
                Err(e) => {
                    report.record_failure(index, key, e.to_string());
                    continue;
                }
            };

            let upserted = sqlx::query(
                r#"
                INSERT INTO part_types (part_model, original_price, show_price, image)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (part_model) DO UPDATE
                SET original_price = COALESCE($2, part_types.original_price),
                    show_price = COALESCE($3, part_types.show_price),
                    image = COALESCE($4, part_types.image),
                    updated_at = NOW()
                "#,
            )
            .bind(&input.part_model)
            .bind(input.original_price)
            .bind(input.show_price)
            .bind(&input.image)
            .execute(&self.db)
            .await;

            match upserted {
                Ok(_) => report.record_success(),
                Err(e) => {
                    tracing::warn!(index, part_model = ?key, error = %e, "Part import row failed");
                    report.record_failure(index, key, e.to_string());
                }
            }
        }

        tracing::info!(
            imported = report.imported_count,
            failed = report.failed_count,
            "Part import finished"
        );
        Ok(report)
    }

    pub async fn export_parts(&self, role: UserRole) -> AppResult<Vec<PartType>> {
        let parts = sqlx::query_as::<_, PartType>(&format!(
            "SELECT {} FROM part_types ORDER BY part_model",
            PART_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(parts.into_iter().map(|p| p.visible_to(role)).collect())
    }

    async fn part_model_taken(&self, part_model: &str, except: Option<i32>) -> AppResult<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM part_types
                WHERE part_model = $1 AND ($2::int IS NULL OR part_type_id <> $2)
            )
            "#,
        )
        .bind(part_model)
        .bind(except)
        .fetch_one(&self.db)
        .await?;

        Ok(taken)
    }
}
