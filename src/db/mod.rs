use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};

#[derive(Debug, Clone, PartialEq)]
pub struct SuburbRow {
    pub suburb_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub crime_category_id: i64,
    pub offence: String,
    pub subcategory: String,
}

/// One monthly fact joined with its dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub name: String,
    pub offence: String,
    pub subcategory: String,
    pub start_date: String,
    pub end_date: String,
    pub rate: i64,
}

/// One (offence, subcategory) aggregate over a date window.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub offence: String,
    pub subcategory: String,
    pub rate: i64,
}

/// Optional filters for the per-month rate query. Date bounds are
/// inclusive string comparisons on ISO `YYYY-MM-DD` dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category_id: Option<i64>,
}

pub struct CrimeDb {
    conn: Connection,
}

impl CrimeDb {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Drops and recreates the three tables. Drop order matters:
    /// facts first, then categories, then suburbs.
    pub fn recreate_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS CRIME_RATE;
            DROP TABLE IF EXISTS CRIME_CATEGORY;
            DROP TABLE IF EXISTS SUBURB;

            CREATE TABLE SUBURB (
                SUBURB_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                NAME varchar(100)
            );

            CREATE TABLE CRIME_CATEGORY (
                CRIME_CATEGORY_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                OFFENCE varchar(100),
                SUBCATEGORY varchar(200)
            );

            CREATE TABLE CRIME_RATE (
                CRIME_RATE_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                SUBURB_ID int,
                CRIME_CATEGORY_ID int,
                START_DATE datetime,
                END_DATE datetime,
                RATE int,
                FOREIGN KEY (SUBURB_ID)
                    REFERENCES SUBURB (SUBURB_ID)
            );
            ",
        )
    }

    /// Runs after the load completes; `IDX_SUBURB_NAME` is unique.
    pub fn create_indexes(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE UNIQUE INDEX \"IDX_SUBURB_NAME\" ON \"SUBURB\" (\"NAME\" ASC);
            CREATE INDEX \"IDX_CRIME_RATE_SUBURB_ID\" ON \"CRIME_RATE\" (\"SUBURB_ID\" ASC);
            ",
        )
    }

    pub fn transaction(&self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    pub fn suburb_id(&self, name: &str) -> rusqlite::Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT SUBURB_ID FROM SUBURB WHERE NAME = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn category_id(&self, offence: &str, subcategory: &str) -> rusqlite::Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT CRIME_CATEGORY_ID FROM CRIME_CATEGORY
                 WHERE OFFENCE = ?1 AND SUBCATEGORY = ?2",
                params![offence, subcategory],
                |row| row.get(0),
            )
            .optional()
    }

    /// Lookup-then-insert dedup. Returns the row id and whether the row
    /// was created by this call. Safe only under the single-threaded
    /// loader.
    pub fn ensure_suburb(&self, name: &str) -> rusqlite::Result<(i64, bool)> {
        if let Some(id) = self.suburb_id(name)? {
            return Ok((id, false));
        }
        self.conn
            .execute("INSERT INTO SUBURB (NAME) VALUES (?1)", params![name])?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn ensure_category(
        &self,
        offence: &str,
        subcategory: &str,
    ) -> rusqlite::Result<(i64, bool)> {
        if let Some(id) = self.category_id(offence, subcategory)? {
            return Ok((id, false));
        }
        self.conn.execute(
            "INSERT INTO CRIME_CATEGORY (OFFENCE, SUBCATEGORY) VALUES (?1, ?2)",
            params![offence, subcategory],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn insert_rate(
        &self,
        suburb_id: i64,
        category_id: i64,
        start_date: &str,
        end_date: &str,
        rate: i64,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO CRIME_RATE (SUBURB_ID, CRIME_CATEGORY_ID, START_DATE, END_DATE, RATE)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![suburb_id, category_id, start_date, end_date, rate],
        )?;
        Ok(())
    }

    pub fn suburbs(&self) -> rusqlite::Result<Vec<SuburbRow>> {
        let mut stmt = self.conn.prepare("SELECT SUBURB_ID, NAME FROM SUBURB")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(SuburbRow {
                suburb_id: row.get(0)?,
                name: row.get(1)?,
            });
        }
        Ok(out)
    }

    pub fn categories(&self) -> rusqlite::Result<Vec<CategoryRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT CRIME_CATEGORY_ID, OFFENCE, SUBCATEGORY FROM CRIME_CATEGORY")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CategoryRow {
                crime_category_id: row.get(0)?,
                offence: row.get(1)?,
                subcategory: row.get(2)?,
            });
        }
        Ok(out)
    }

    /// Monthly facts for one suburb, optionally narrowed by date window
    /// and category. Suburb match is exact and case-sensitive. Every
    /// filter value is a bound parameter.
    pub fn rates_for_suburb(
        &self,
        suburb: &str,
        filter: &RateFilter,
    ) -> rusqlite::Result<Vec<RateRow>> {
        let mut sql = String::from(
            "SELECT SUBURB.NAME, CRIME_CATEGORY.OFFENCE, CRIME_CATEGORY.SUBCATEGORY,
                    CRIME_RATE.START_DATE, CRIME_RATE.END_DATE, CRIME_RATE.RATE
             FROM SUBURB
             JOIN CRIME_RATE ON SUBURB.SUBURB_ID = CRIME_RATE.SUBURB_ID
             JOIN CRIME_CATEGORY ON CRIME_CATEGORY.CRIME_CATEGORY_ID = CRIME_RATE.CRIME_CATEGORY_ID
             WHERE SUBURB.NAME = ?1",
        );
        let mut values = vec![Value::Text(suburb.to_string())];
        if let Some(start) = &filter.start_date {
            values.push(Value::Text(start.clone()));
            sql.push_str(&format!(" AND CRIME_RATE.START_DATE >= ?{}", values.len()));
        }
        if let Some(end) = &filter.end_date {
            values.push(Value::Text(end.clone()));
            sql.push_str(&format!(" AND CRIME_RATE.END_DATE <= ?{}", values.len()));
        }
        if let Some(category_id) = filter.category_id {
            values.push(Value::Integer(category_id));
            sql.push_str(&format!(
                " AND CRIME_RATE.CRIME_CATEGORY_ID = ?{}",
                values.len()
            ));
        }
        sql.push_str(" ORDER BY CRIME_RATE.CRIME_CATEGORY_ID ASC, CRIME_RATE.START_DATE ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(RateRow {
                name: row.get(0)?,
                offence: row.get(1)?,
                subcategory: row.get(2)?,
                start_date: row.get(3)?,
                end_date: row.get(4)?,
                rate: row.get(5)?,
            });
        }
        Ok(out)
    }

    /// Sum of monthly rates per (offence, subcategory) for one suburb
    /// over an optional date window.
    pub fn summary_for_suburb(
        &self,
        suburb: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> rusqlite::Result<Vec<SummaryRow>> {
        let mut sql = String::from(
            "SELECT SUBURB.NAME, CRIME_CATEGORY.OFFENCE, CRIME_CATEGORY.SUBCATEGORY,
                    SUM(CRIME_RATE.RATE) AS TOTAL_RATE
             FROM SUBURB
             JOIN CRIME_RATE ON SUBURB.SUBURB_ID = CRIME_RATE.SUBURB_ID
             JOIN CRIME_CATEGORY ON CRIME_CATEGORY.CRIME_CATEGORY_ID = CRIME_RATE.CRIME_CATEGORY_ID
             WHERE SUBURB.NAME = ?1",
        );
        let mut values = vec![Value::Text(suburb.to_string())];
        if let Some(start) = start_date {
            values.push(Value::Text(start.to_string()));
            sql.push_str(&format!(" AND CRIME_RATE.START_DATE >= ?{}", values.len()));
        }
        if let Some(end) = end_date {
            values.push(Value::Text(end.to_string()));
            sql.push_str(&format!(" AND CRIME_RATE.END_DATE <= ?{}", values.len()));
        }
        sql.push_str(" GROUP BY SUBURB.NAME, CRIME_CATEGORY.OFFENCE, CRIME_CATEGORY.SUBCATEGORY");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(SummaryRow {
                name: row.get(0)?,
                offence: row.get(1)?,
                subcategory: row.get(2)?,
                rate: row.get(3)?,
            });
        }
        Ok(out)
    }
}
