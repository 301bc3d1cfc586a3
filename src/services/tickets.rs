use std::collections::HashMap;

use jiff::Timestamp;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait, sea_query::Expr,
};
use tracing::{info, warn};

use crate::{
    entities::{movie, screening, ticket, user},
    error::{AppError, AppResult},
    models::{PurchaseRequest, TicketDto},
    services::now_sec,
};

/// Tickets can no longer be refunded this close to the screening start.
pub const REFUND_WINDOW_SECS: i64 = 4 * 3_600;

/// Which tickets a caller may see or refund.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TicketScope {
    All,
    Owner(i32),
}

#[derive(Clone)]
pub struct TicketService {
    db: DatabaseConnection,
}

impl TicketService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self, scope: TicketScope) -> AppResult<Vec<TicketDto>> {
        let mut query = ticket::Entity::find()
            .find_also_related(screening::Entity)
            .order_by_asc(ticket::Column::Id);
        if let TicketScope::Owner(user_id) = scope {
            query = query.filter(ticket::Column::UserId.eq(user_id));
        }
        let rows = query.all(&self.db).await?;

        let movie_ids: Vec<i32> =
            rows.iter().filter_map(|(_, s)| s.as_ref().map(|s| s.movie_id)).collect();
        let movie_names: HashMap<i32, String> = movie::Entity::find()
            .filter(movie::Column::Id.is_in(movie_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| (m.id, m.name))
            .collect();

        rows.into_iter()
            .filter_map(|(t, s)| s.map(|s| (t, s)))
            .map(|(t, s)| {
                let name = movie_names.get(&s.movie_id).cloned().unwrap_or_default();
                ticket_dto(t, &s, name)
            })
            .collect()
    }

    /// Sells `quantity` seats of a screening to an existing user or a guest.
    ///
    /// The whole purchase is one transaction. Seats are reserved with a single
    /// conditional update of `seats_sold`, so two buyers racing for the last
    /// seat cannot both get it.
    pub async fn purchase(&self, req: PurchaseRequest) -> AppResult<Vec<TicketDto>> {
        let guest = req.validate()?;
        let quantity = req.quantity;

        let txn = self.db.begin().await?;

        let (screening, movie) = screening::Entity::find_by_id(req.screening_id)
            .find_also_related(movie::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("Screening not found."))?;
        let movie = movie.ok_or_else(|| AppError::not_found("Movie not found."))?;

        let now = now_sec();
        if screening.start_time + i64::from(movie.length) * 60 <= now {
            return Err(AppError::conflict("Screening has already ended."));
        }
        if screening.start_time <= now {
            return Err(AppError::conflict("Screening has already started."));
        }

        let reserved = screening::Entity::update_many()
            .col_expr(
                screening::Column::SeatsSold,
                Expr::col(screening::Column::SeatsSold).add(quantity),
            )
            .filter(screening::Column::Id.eq(screening.id))
            .filter(
                Expr::col(screening::Column::SeatsSold)
                    .lte(Expr::col(screening::Column::Capacity).sub(quantity)),
            )
            .exec(&txn)
            .await?;
        if reserved.rows_affected == 0 {
            warn!(
                screening_id = screening.id,
                requested = quantity,
                seats_left = screening.seats_left(),
                "purchase rejected: capacity full"
            );
            return Err(AppError::conflict("Screening capacity full."));
        }

        let buyer = match (req.user_id, guest) {
            (Some(user_id), _) => user::Entity::find_by_id(user_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::not_found("User not found."))?,
            (None, Some(contact)) => {
                user::ActiveModel {
                    email: Set(contact.email),
                    password_hash: Set(String::new()),
                    phone_number: Set(contact.phone_number),
                    is_registered: Set(false),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            },
            (None, None) => {
                return Err(AppError::validation(
                    "email and phone number are required for non-registered users",
                ));
            },
        };

        let mut tickets = Vec::with_capacity(quantity as usize);
        for _ in 0..quantity {
            let ticket = ticket::ActiveModel {
                screening_id: Set(screening.id),
                user_id: Set(buyer.id),
                email: Set(Some(buyer.email.clone())),
                phone_number: Set(Some(buyer.phone_number.clone())),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            tickets.push(ticket);
        }

        txn.commit().await?;

        info!(
            screening_id = screening.id,
            user_id = buyer.id,
            guest = !buyer.is_registered,
            quantity,
            "tickets purchased"
        );

        tickets.into_iter().map(|t| ticket_dto(t, &screening, movie.name.clone())).collect()
    }

    /// Deletes a ticket and frees its seat, unless the screening starts
    /// within [`REFUND_WINDOW_SECS`].
    pub async fn refund(&self, id: i32, scope: TicketScope) -> AppResult<()> {
        let txn = self.db.begin().await?;

        let (ticket, screening) = ticket::Entity::find_by_id(id)
            .find_also_related(screening::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("Ticket not found."))?;
        let screening = screening.ok_or_else(|| AppError::not_found("Screening not found."))?;

        if let TicketScope::Owner(user_id) = scope {
            if ticket.user_id != user_id {
                return Err(AppError::forbidden("Ticket belongs to another user."));
            }
        }

        if screening.start_time - now_sec() <= REFUND_WINDOW_SECS {
            return Err(AppError::conflict(
                "Tickets cannot be refunded within 4 hours of the screening start.",
            ));
        }

        ticket::Entity::delete_by_id(ticket.id).exec(&txn).await?;
        screening::Entity::update_many()
            .col_expr(
                screening::Column::SeatsSold,
                Expr::col(screening::Column::SeatsSold).sub(1),
            )
            .filter(screening::Column::Id.eq(screening.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(ticket_id = id, screening_id = screening.id, "ticket refunded");
        Ok(())
    }
}

fn ticket_dto(t: ticket::Model, s: &screening::Model, movie_name: String) -> AppResult<TicketDto> {
    Ok(TicketDto {
        id: t.id,
        screening_id: t.screening_id,
        user_id: t.user_id,
        email: t.email,
        phone_number: t.phone_number,
        movie_name,
        start_time: Timestamp::from_second(s.start_time)?,
        room: s.room,
    })
}

#[cfg(test)]
mod tests {
    use sea_orm::PaginatorTrait;

    use super::*;
    use crate::test_support;

    fn guest_purchase(screening_id: i32, quantity: i32) -> PurchaseRequest {
        PurchaseRequest {
            screening_id,
            user_id: None,
            email: Some("guest@example.com".to_string()),
            phone_number: Some("+36 30 555 1234".to_string()),
            quantity,
        }
    }

    fn member_purchase(screening_id: i32, user_id: i32) -> PurchaseRequest {
        PurchaseRequest {
            screening_id,
            user_id: Some(user_id),
            email: None,
            phone_number: None,
            quantity: 1,
        }
    }

    async fn sold(db: &DatabaseConnection, screening_id: i32) -> (u64, i32) {
        let count = ticket::Entity::find()
            .filter(ticket::Column::ScreeningId.eq(screening_id))
            .count(db)
            .await
            .unwrap();
        let counter = screening::Entity::find_by_id(screening_id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .seats_sold;
        (count, counter)
    }

    #[tokio::test]
    async fn guest_purchase_creates_unregistered_user() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 10).await;
        let tickets = TicketService::new(db.clone());

        let bought = tickets.purchase(guest_purchase(s.id, 2)).await.unwrap();
        assert_eq!(bought.len(), 2);
        assert_eq!(bought[0].email.as_deref(), Some("guest@example.com"));
        assert_eq!(bought[0].movie_name, movie.name);
        assert_eq!(bought[0].user_id, bought[1].user_id);

        let guest = user::Entity::find_by_id(bought[0].user_id).one(&db).await.unwrap().unwrap();
        assert!(!guest.is_registered);
        assert!(guest.password_hash.is_empty());
        assert_eq!(sold(&db, s.id).await, (2, 2));
    }

    #[tokio::test]
    async fn member_purchase_binds_to_account() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 10).await;
        let member = test_support::member(&db, "member@example.com").await;
        let tickets = TicketService::new(db.clone());

        let bought = tickets.purchase(member_purchase(s.id, member.id)).await.unwrap();
        assert_eq!(bought[0].user_id, member.id);
        assert_eq!(bought[0].email.as_deref(), Some("member@example.com"));

        let result = tickets.purchase(member_purchase(s.id, 9_999)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(sold(&db, s.id).await, (1, 1));
    }

    #[tokio::test]
    async fn guest_without_contact_fails_validation() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 10).await;
        let tickets = TicketService::new(db);

        let mut req = guest_purchase(s.id, 1);
        req.phone_number = None;
        assert!(matches!(tickets.purchase(req).await, Err(AppError::Validation(_))));

        let mut req = guest_purchase(s.id, 1);
        req.email = None;
        assert!(matches!(tickets.purchase(req).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_screening_is_not_found() {
        let db = test_support::db().await;
        let tickets = TicketService::new(db);
        let result = tickets.purchase(guest_purchase(77, 1)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn started_and_ended_screenings_are_rejected() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let running = test_support::screening(&db, movie.id, -600, 10).await;
        let over = test_support::screening(&db, movie.id, -86_400, 10).await;
        let tickets = TicketService::new(db.clone());

        match tickets.purchase(guest_purchase(running.id, 1)).await {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("started")),
            other => panic!("unexpected: {other:?}"),
        }
        match tickets.purchase(guest_purchase(over.id, 1)).await {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("ended")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(sold(&db, running.id).await, (0, 0));
    }

    #[tokio::test]
    async fn third_ticket_of_two_seat_screening_is_rejected() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 2).await;
        let tickets = TicketService::new(db.clone());

        tickets.purchase(guest_purchase(s.id, 1)).await.unwrap();
        tickets.purchase(guest_purchase(s.id, 1)).await.unwrap();

        match tickets.purchase(guest_purchase(s.id, 1)).await {
            Err(AppError::Conflict(msg)) => assert!(msg.contains("capacity")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(sold(&db, s.id).await, (2, 2));
    }

    #[tokio::test]
    async fn oversized_order_leaves_no_trace() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 3).await;
        let tickets = TicketService::new(db.clone());

        tickets.purchase(guest_purchase(s.id, 2)).await.unwrap();
        let users_before = user::Entity::find().count(&db).await.unwrap();

        let result = tickets.purchase(guest_purchase(s.id, 2)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(user::Entity::find().count(&db).await.unwrap(), users_before);

        tickets.purchase(guest_purchase(s.id, 1)).await.unwrap();
        assert_eq!(sold(&db, s.id).await, (3, 3));
    }

    #[tokio::test]
    async fn never_oversells_under_mixed_orders() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 86_400, 7).await;
        let tickets = TicketService::new(db.clone());

        for quantity in [3, 2, 4, 1, 2, 1, 5, 1] {
            let _ = tickets.purchase(guest_purchase(s.id, quantity)).await;
            let (count, counter) = sold(&db, s.id).await;
            assert!(count <= 7);
            assert_eq!(count, counter as u64);
        }
        assert_eq!(sold(&db, s.id).await, (7, 7));
    }

    #[tokio::test]
    async fn refund_window_is_four_hours() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let in_three_hours = test_support::screening(&db, movie.id, 3 * 3_600, 10).await;
        let at_cutoff = test_support::screening(&db, movie.id, REFUND_WINDOW_SECS, 10).await;
        let in_five_hours = test_support::screening(&db, movie.id, 5 * 3_600, 10).await;
        let tickets = TicketService::new(db.clone());

        let near = tickets.purchase(guest_purchase(in_three_hours.id, 1)).await.unwrap();
        let edge = tickets.purchase(guest_purchase(at_cutoff.id, 1)).await.unwrap();
        let far = tickets.purchase(guest_purchase(in_five_hours.id, 1)).await.unwrap();

        let result = tickets.refund(near[0].id, TicketScope::All).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(sold(&db, in_three_hours.id).await, (1, 1));

        let result = tickets.refund(edge[0].id, TicketScope::All).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(sold(&db, at_cutoff.id).await, (1, 1));

        tickets.refund(far[0].id, TicketScope::All).await.unwrap();
        assert_eq!(sold(&db, in_five_hours.id).await, (0, 0));

        let result = tickets.refund(far[0].id, TicketScope::All).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn owners_only_refund_their_own() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 100).await;
        let s = test_support::screening(&db, movie.id, 2 * 86_400, 10).await;
        let alice = test_support::member(&db, "alice@example.com").await;
        let bob = test_support::member(&db, "bob@example.com").await;
        let tickets = TicketService::new(db);

        let bought = tickets.purchase(member_purchase(s.id, alice.id)).await.unwrap();
        let result = tickets.refund(bought[0].id, TicketScope::Owner(bob.id)).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        assert_eq!(tickets.list(TicketScope::Owner(bob.id)).await.unwrap().len(), 0);
        assert_eq!(tickets.list(TicketScope::Owner(alice.id)).await.unwrap().len(), 1);
        assert_eq!(tickets.list(TicketScope::All).await.unwrap().len(), 1);

        tickets.refund(bought[0].id, TicketScope::Owner(alice.id)).await.unwrap();
        assert!(tickets.list(TicketScope::All).await.unwrap().is_empty());
    }
}
