use std::collections::HashMap;

use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    chat::events::{CompanyAssignment, HomeownerSummary},
    db::{self, Assignment, ChatRoom},
    AppResult,
};

const ASSIGNMENT_COLUMNS: &str = "id,homeowner_id,company_id,room_id,active,created_at";

/// Returns the homeowner's active pairing, creating (or reviving) one with
/// the least-loaded company when needed. `None` means no company exists yet.
///
/// Load balancing is count-then-act and may pick a stale minimum under
/// contention. Only the UNIQUE(homeowner_id) constraint keeps a racing
/// second connect from creating a duplicate; that writer gets the store error.
pub async fn find_or_create_assignment(
    db_pool: &SqlitePool,
    homeowner_id: &str,
) -> AppResult<Option<Assignment>> {
    let existing = assignment_for_homeowner(db_pool, homeowner_id).await?;
    if let Some(assignment) = &existing {
        if assignment.active {
            return Ok(existing);
        }
    }

    let companies = db::company_ids(db_pool).await?;
    let loads = active_loads(db_pool).await?;
    let Some(company_id) = least_loaded(&companies, &loads) else {
        tracing::info!(homeowner_id, "no company available for assignment");
        return Ok(None);
    };

    let assignment = match existing {
        Some(inactive) => reactivate(db_pool, inactive, company_id).await?,
        None => create_assignment(db_pool, homeowner_id, company_id).await?,
    };

    tracing::info!(
        homeowner_id,
        company_id = %assignment.company_id,
        room_id = %assignment.room_id,
        "homeowner assigned"
    );
    Ok(Some(assignment))
}

/// First company with the fewest active assignments, in `companies` order.
pub fn least_loaded<'a>(companies: &'a [String], loads: &HashMap<String, i64>) -> Option<&'a str> {
    companies
        .iter()
        .min_by_key(|company| loads.get(*company).copied().unwrap_or(0))
        .map(String::as_str)
}

async fn active_loads(db_pool: &SqlitePool) -> AppResult<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT company_id,COUNT(*) FROM assignments WHERE active=1 GROUP BY company_id")
            .fetch_all(db_pool)
            .await?;
    Ok(rows.into_iter().collect())
}

/// Creates a room and its assignment in one transaction.
pub async fn create_assignment(
    db_pool: &SqlitePool,
    homeowner_id: &str,
    company_id: &str,
) -> AppResult<Assignment> {
    let now = OffsetDateTime::now_utc();
    let room = ChatRoom {
        id: Uuid::now_v7().to_string(),
        created_at: now,
    };
    let assignment = Assignment {
        id: Uuid::now_v7().to_string(),
        homeowner_id: homeowner_id.to_owned(),
        company_id: company_id.to_owned(),
        room_id: room.id.clone(),
        active: true,
        created_at: now,
    };

    let mut tx = db_pool.begin().await?;
    sqlx::query("INSERT INTO chat_rooms (id,created_at) VALUES (?,?)")
        .bind(&room.id)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO assignments (id,homeowner_id,company_id,room_id,active,created_at) VALUES (?,?,?,?,?,?)")
        .bind(&assignment.id)
        .bind(&assignment.homeowner_id)
        .bind(&assignment.company_id)
        .bind(&assignment.room_id)
        .bind(assignment.active)
        .bind(assignment.created_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(assignment)
}

/// Revives an inactive pairing in place: same room (and history), rebound
/// to `company_id`.
async fn reactivate(db_pool: &SqlitePool, inactive: Assignment, company_id: &str) -> AppResult<Assignment> {
    let updated = sqlx::query("UPDATE assignments SET company_id=?, active=1 WHERE id=? AND active=0")
        .bind(company_id)
        .bind(&inactive.id)
        .execute(db_pool)
        .await?
        .rows_affected();

    if updated == 0 {
        // a concurrent connect got there first; theirs stands
        return assignment_for_homeowner(db_pool, &inactive.homeowner_id)
            .await?
            .ok_or_else(|| "assignment vanished during reactivation".into());
    }

    Ok(Assignment {
        company_id: company_id.to_owned(),
        active: true,
        ..inactive
    })
}

pub async fn assignment_for_homeowner(db_pool: &SqlitePool, homeowner_id: &str) -> AppResult<Option<Assignment>> {
    Ok(
        sqlx::query_as(&format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE homeowner_id=?"))
            .bind(homeowner_id)
            .fetch_optional(db_pool)
            .await?
    )
}

pub async fn assignment_by_room(db_pool: &SqlitePool, room_id: &str) -> AppResult<Option<Assignment>> {
    Ok(
        sqlx::query_as(&format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE room_id=?"))
            .bind(room_id)
            .fetch_optional(db_pool)
            .await?
    )
}

#[derive(sqlx::FromRow)]
struct CaseloadRow {
    id: String,
    homeowner_id: String,
    company_id: String,
    room_id: String,
    active: bool,
    created_at: OffsetDateTime,
    room_created_at: OffsetDateTime,
    homeowner_email: Option<String>,
}

/// A company's active caseload, oldest pairing first.
pub async fn assignments_for_company(db_pool: &SqlitePool, company_id: &str) -> AppResult<Vec<CompanyAssignment>> {
    let rows: Vec<CaseloadRow> = sqlx::query_as(
        "SELECT a.id,a.homeowner_id,a.company_id,a.room_id,a.active,a.created_at,
                r.created_at AS room_created_at, u.email AS homeowner_email
         FROM assignments a
         JOIN chat_rooms r ON r.id=a.room_id
         LEFT JOIN users u ON u.id=a.homeowner_id
         WHERE a.company_id=? AND a.active=1
         ORDER BY julianday(a.created_at), a.id",
    )
    .bind(company_id)
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CompanyAssignment {
            room: ChatRoom {
                id: row.room_id.clone(),
                created_at: row.room_created_at,
            },
            homeowner: HomeownerSummary {
                id: row.homeowner_id.clone(),
                email: row.homeowner_email,
            },
            assignment: Assignment {
                id: row.id,
                homeowner_id: row.homeowner_id,
                company_id: row.company_id,
                room_id: row.room_id,
                active: row.active,
                created_at: row.created_at,
            },
        })
        .collect())
}

/// Ends a pairing. The room and its messages stay; returns false if there
/// was no active pairing to end.
pub async fn deactivate_assignment(db_pool: &SqlitePool, homeowner_id: &str) -> AppResult<bool> {
    let updated = sqlx::query("UPDATE assignments SET active=0 WHERE homeowner_id=? AND active=1")
        .bind(homeowner_id)
        .execute(db_pool)
        .await?
        .rows_affected();
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    async fn count(db_pool: &SqlitePool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(db_pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn assignment_is_idempotent() {
        let pool = testing::pool().await;
        testing::company(&pool, "c1").await;

        let first = find_or_create_assignment(&pool, "h1").await.unwrap().unwrap();
        let second = find_or_create_assignment(&pool, "h1").await.unwrap().unwrap();

        assert_eq!(first.room_id, second.room_id);
        assert_eq!(first.company_id, second.company_id);
        assert_eq!(count(&pool, "chat_rooms").await, 1);
        assert_eq!(count(&pool, "assignments").await, 1);
    }

    #[tokio::test]
    async fn picks_least_loaded_company() {
        let pool = testing::pool().await;
        testing::company(&pool, "c2").await;
        testing::company(&pool, "c1").await;
        for h in ["h-a", "h-b", "h-c"] {
            create_assignment(&pool, h, "c2").await.unwrap();
        }

        let assignment = find_or_create_assignment(&pool, "h-new").await.unwrap().unwrap();
        assert_eq!(assignment.company_id, "c1");
    }

    #[tokio::test]
    async fn ties_go_to_the_first_company() {
        let pool = testing::pool().await;
        testing::company(&pool, "first").await;
        testing::company(&pool, "second").await;

        let a = find_or_create_assignment(&pool, "h1").await.unwrap().unwrap();
        let b = find_or_create_assignment(&pool, "h2").await.unwrap().unwrap();
        let c = find_or_create_assignment(&pool, "h3").await.unwrap().unwrap();
        assert_eq!(a.company_id, "first");
        assert_eq!(b.company_id, "second");
        assert_eq!(c.company_id, "first");
    }

    #[test]
    fn least_loaded_ignores_unknown_counts() {
        let companies = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let loads = HashMap::from([("a".to_owned(), 2), ("b".to_owned(), 1), ("gone".to_owned(), 0)]);
        assert_eq!(least_loaded(&companies, &loads), Some("c"));
        assert_eq!(least_loaded(&[], &loads), None);
    }

    #[tokio::test]
    async fn no_company_means_pending() {
        let pool = testing::pool().await;
        testing::homeowner(&pool, "h1").await;

        assert!(find_or_create_assignment(&pool, "h1").await.unwrap().is_none());
        assert_eq!(count(&pool, "chat_rooms").await, 0);
        assert_eq!(count(&pool, "assignments").await, 0);
    }

    #[tokio::test]
    async fn duplicate_create_is_surfaced() {
        let pool = testing::pool().await;
        create_assignment(&pool, "h1", "c1").await.unwrap();

        let err = create_assignment(&pool, "h1", "c2").await.unwrap_err();
        assert!(err.is_unique_violation());
        // the failed transaction left no orphaned room behind
        assert_eq!(count(&pool, "chat_rooms").await, 1);
    }

    #[tokio::test]
    async fn inactive_assignment_is_revived_in_the_same_room() {
        let pool = testing::pool().await;
        testing::company(&pool, "busy").await;
        let original = find_or_create_assignment(&pool, "h1").await.unwrap().unwrap();

        assert!(deactivate_assignment(&pool, "h1").await.unwrap());
        assert!(!deactivate_assignment(&pool, "h1").await.unwrap());

        testing::company(&pool, "idle").await;
        create_assignment(&pool, "h2", "busy").await.unwrap();

        let revived = find_or_create_assignment(&pool, "h1").await.unwrap().unwrap();
        assert_eq!(revived.id, original.id);
        assert_eq!(revived.room_id, original.room_id);
        assert_eq!(revived.company_id, "idle");
        assert!(revived.active);
        assert_eq!(assignment_for_homeowner(&pool, "h1").await.unwrap(), Some(revived));
        assert_eq!(count(&pool, "chat_rooms").await, 2);
    }

    #[tokio::test]
    async fn caseload_lists_active_assignments_only() {
        let pool = testing::pool().await;
        testing::company(&pool, "c1").await;
        testing::homeowner(&pool, "h1").await;

        let kept = create_assignment(&pool, "h1", "c1").await.unwrap();
        create_assignment(&pool, "h2", "c1").await.unwrap();
        create_assignment(&pool, "h3", "c2").await.unwrap();
        deactivate_assignment(&pool, "h2").await.unwrap();

        let caseload = assignments_for_company(&pool, "c1").await.unwrap();
        assert_eq!(caseload.len(), 1);
        let entry = &caseload[0];
        assert_eq!(entry.assignment, kept);
        assert_eq!(entry.room.id, kept.room_id);
        assert_eq!(entry.homeowner.email.as_deref(), Some("h1@example.com"));
    }

    #[tokio::test]
    async fn lookup_by_room() {
        let pool = testing::pool().await;
        let created = create_assignment(&pool, "h1", "c1").await.unwrap();

        assert_eq!(assignment_by_room(&pool, &created.room_id).await.unwrap(), Some(created));
        assert!(assignment_by_room(&pool, "missing").await.unwrap().is_none());
    }
}
