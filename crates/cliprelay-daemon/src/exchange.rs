//! Short-lived stream key exchange.
//!
//! An operator offers a stream key and gets back a ticket; a later command
//! redeems the ticket against a chosen platform. Offers expire after a fixed
//! TTL and the cache never holds more than `capacity` of them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::RngExt;
use tokio::sync::Mutex;
use tracing::debug;

const TICKET_LEN: usize = 8;

fn generate_ticket() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..TICKET_LEN)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

struct Offer {
    ticket: String,
    token: String,
    expires_at: Instant,
}

pub struct KeyExchange {
    ttl: Duration,
    capacity: usize,
    /// Oldest first.
    offers: Mutex<VecDeque<Offer>>,
}

impl KeyExchange {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            offers: Mutex::new(VecDeque::new()),
        }
    }

    /// Store `token` and return the ticket that redeems it.
    pub async fn offer(&self, token: impl Into<String>) -> String {
        let mut offers = self.offers.lock().await;
        evict_expired(&mut offers);
        while offers.len() >= self.capacity {
            if let Some(evicted) = offers.pop_front() {
                debug!(ticket = %evicted.ticket, "Key exchange full, evicting oldest offer");
            }
        }

        let mut ticket = generate_ticket();
        while offers.iter().any(|o| o.ticket == ticket) {
            ticket = generate_ticket();
        }
        offers.push_back(Offer {
            ticket: ticket.clone(),
            token: token.into(),
            expires_at: Instant::now() + self.ttl,
        });
        ticket
    }

    /// Consume `ticket`. Returns the offered token once; afterwards, or after
    /// expiry, returns `None`.
    pub async fn redeem(&self, ticket: &str) -> Option<String> {
        let mut offers = self.offers.lock().await;
        evict_expired(&mut offers);
        let ticket = ticket.trim();
        let pos = offers
            .iter()
            .position(|o| o.ticket.eq_ignore_ascii_case(ticket))?;
        offers.remove(pos).map(|o| o.token)
    }

    /// Live offers.
    pub async fn outstanding(&self) -> usize {
        let mut offers = self.offers.lock().await;
        evict_expired(&mut offers);
        offers.len()
    }
}

fn evict_expired(offers: &mut VecDeque<Offer>) {
    let now = Instant::now();
    let before = offers.len();
    offers.retain(|o| o.expires_at > now);
    let evicted = before - offers.len();
    if evicted > 0 {
        debug!(evicted, "Expired key exchange offers");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticket_redeems_exactly_once() {
        let exchange = KeyExchange::new(Duration::from_secs(60), 4);
        let ticket = exchange.offer("live_abc").await;
        assert_eq!(ticket.len(), TICKET_LEN);

        assert_eq!(exchange.redeem(&ticket).await.as_deref(), Some("live_abc"));
        assert_eq!(exchange.redeem(&ticket).await, None);
    }

    #[tokio::test]
    async fn redeem_is_case_insensitive() {
        let exchange = KeyExchange::new(Duration::from_secs(60), 4);
        let ticket = exchange.offer("k").await;
        assert_eq!(
            exchange.redeem(&ticket.to_lowercase()).await.as_deref(),
            Some("k")
        );
    }

    #[tokio::test]
    async fn offers_expire() {
        let exchange = KeyExchange::new(Duration::from_millis(20), 4);
        let ticket = exchange.offer("k").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(exchange.outstanding().await, 0);
        assert_eq!(exchange.redeem(&ticket).await, None);
    }

    #[tokio::test]
    async fn oldest_offer_evicted_when_full() {
        let exchange = KeyExchange::new(Duration::from_secs(60), 2);
        let first = exchange.offer("one").await;
        let second = exchange.offer("two").await;
        let third = exchange.offer("three").await;

        assert_eq!(exchange.outstanding().await, 2);
        assert_eq!(exchange.redeem(&first).await, None);
        assert_eq!(exchange.redeem(&second).await.as_deref(), Some("two"));
        assert_eq!(exchange.redeem(&third).await.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn unknown_ticket() {
        let exchange = KeyExchange::new(Duration::from_secs(60), 2);
        assert_eq!(exchange.redeem("NOPE1234").await, None);
    }
}
