mod common;

use chrono::{Datelike, Duration, Utc};
use rstest::rstest;

use cardflow::{
    error::AppError,
    models::{
        card::{CardAction, CardStatus, CardType, CreateCardRequest, TopUpRequest},
        ledger::LedgerEntryKind,
        transaction::{Direction, TransactionType},
        user::KycStatus,
    },
    services::{
        card_crypto::is_luhn_valid, card_service::DEFAULT_MAX_TOP_UP_CENTS,
        expiry_sweep::ExpirySweeper, notification::NotificationKind,
    },
};
use common::{IIN, SPENDING_LIMIT_CENTS, TestApp};

fn request(card_type: &str) -> CreateCardRequest {
    CreateCardRequest {
        card_type: card_type.to_string(),
        currency: "usd".to_string(),
        spending_limit_cents: 50_000,
    }
}

fn top_up(amount_cents: i64, key: Option<&str>) -> TopUpRequest {
    TopUpRequest {
        amount_cents,
        idempotency_key: key.map(str::to_string),
    }
}

#[rstest]
#[case::never_started(None)]
#[case::started(Some(KycStatus::Started))]
#[case::documents_only(Some(KycStatus::DocumentsUploaded))]
#[tokio::test]
async fn issuing_requires_verified_kyc(#[case] kyc: Option<KycStatus>) {
    let app = TestApp::new();
    let user = app.user_with_kyc(kyc).await;

    let err = app
        .cards
        .create_card(user.id, request("multi-use"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::IncompleteKyc));
}

#[rstest]
#[case::single_use("single-use", CardType::SingleUse, 1)]
#[case::multi_use("multi-use", CardType::MultiUse, 3)]
#[tokio::test]
async fn issued_card_has_valid_secrets(
    #[case] raw_type: &str,
    #[case] card_type: CardType,
    #[case] years: i32,
) {
    let app = TestApp::new();
    let user = app.verified_user().await;

    let issued = app.cards.create_card(user.id, request(raw_type)).await.unwrap();

    assert_eq!(issued.card_type, card_type);
    assert_eq!(issued.pan.len(), 16);
    assert!(issued.pan.starts_with(IIN));
    assert!(is_luhn_valid(&issued.pan));
    assert_eq!(issued.cvv.len(), 3);
    assert!(issued.cvv.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(issued.masked_pan, format!("4532********{}", &issued.pan[12..]));
    assert!(issued.reference.starts_with("CRDFLW"));
    assert_eq!(issued.currency, "USD");
    assert_eq!(issued.balance_cents, 0);
    assert_eq!(issued.status, CardStatus::Active);
    assert_eq!(
        issued.expiry_year,
        (Utc::now().year() + years).to_string()
    );

    let stored = app.card(issued.id).await;
    assert_ne!(stored.pan_encrypted, issued.pan);
    assert!(!stored.pan_encrypted.contains(&issued.pan));
}

#[tokio::test]
async fn invalid_issue_requests_are_refused() {
    let app = TestApp::new();
    let user = app.verified_user().await;

    let err = app
        .cards
        .create_card(user.id, request("prepaid"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCardType(t) if t == "prepaid"));

    let mut zero_limit = request("multi-use");
    zero_limit.spending_limit_cents = 0;
    let err = app.cards.create_card(user.id, zero_limit).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let mut bad_currency = request("multi-use");
    bad_currency.currency = "US".to_string();
    let err = app.cards.create_card(user.id, bad_currency).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test]
async fn card_details_are_owner_scoped() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let stranger = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let details = app.cards.get_card(owner.id, issued.id).await.unwrap();
    assert_eq!(details.pan, issued.pan);
    assert_eq!(details.cvv, issued.cvv);
    assert_eq!(details.spending_limit_cents, SPENDING_LIMIT_CENTS);

    let err = app.cards.get_card(stranger.id, issued.id).await.unwrap_err();
    assert!(matches!(err, AppError::CardNotFound));

    app.issue_card(&owner).await;
    assert_eq!(app.cards.list_cards(owner.id).await.unwrap().len(), 2);
    assert!(app.cards.list_cards(stranger.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn top_up_credits_amount_minus_fee() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let response = app
        .cards
        .top_up(owner.id, issued.id, top_up(10_000, None))
        .await
        .unwrap();

    assert_eq!(response.amount_cents, 10_000);
    assert_eq!(response.fee_cents, 100);
    assert_eq!(response.credited_cents, 9_900);
    assert_eq!(response.balance_cents, 9_900);
    assert!(response.transaction_reference.starts_with("TOPUP"));

    let transactions = app.cards.list_transactions(owner.id, issued.id).await.unwrap();
    assert_eq!(transactions[0].transaction_type, TransactionType::Funding);
    assert_eq!(transactions[0].direction, Direction::Credit);

    let ledger = app.cards.list_ledger(owner.id, issued.id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].entry_type, LedgerEntryKind::TopUp);
    assert_eq!(ledger[0].fee_cents, 100);
    assert_eq!(ledger[0].balance_after_cents, 9_900);

    let sent = app.notifier.wait_for(1).await;
    assert_eq!(sent[0].kind, NotificationKind::Funded);
    assert_eq!(sent[0].amount.as_deref(), Some("100.00"));
    assert_eq!(sent[0].fee.as_deref(), Some("1.00"));
    assert_eq!(sent[0].balance, "99.00");
}

#[tokio::test]
async fn top_up_with_same_key_is_applied_once() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let first = app
        .cards
        .top_up(owner.id, issued.id, top_up(10_000, Some("topup-1")))
        .await
        .unwrap();
    let second = app
        .cards
        .top_up(owner.id, issued.id, top_up(10_000, Some("topup-1")))
        .await
        .unwrap();

    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(second.balance_cents, 9_900);
    assert_eq!(app.card(issued.id).await.current_balance_cents, 9_900);
    assert_eq!(app.store.transaction_count().await, 1);
}

#[tokio::test]
async fn top_up_is_refused_for_bad_amounts_and_frozen_cards() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let err = app
        .cards
        .top_up(owner.id, issued.id, top_up(0, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    app.cards
        .modify_card_status(owner.id, issued.id, CardAction::Freeze)
        .await
        .unwrap();
    let err = app
        .cards
        .top_up(owner.id, issued.id, top_up(1_000, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CardNotActive));
    assert_eq!(app.store.transaction_count().await, 0);
}

#[rstest]
#[case::fee_would_overflow(i64::MAX / 50)]
#[case::largest_amount(i64::MAX)]
#[case::just_above_ceiling(DEFAULT_MAX_TOP_UP_CENTS + 1)]
#[tokio::test]
async fn oversized_top_ups_are_refused(#[case] amount_cents: i64) {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let err = app
        .cards
        .top_up(owner.id, issued.id, top_up(amount_cents, None))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert_eq!(app.card(issued.id).await.current_balance_cents, 0);
    assert_eq!(app.store.transaction_count().await, 0);
    assert_eq!(app.store.ledger_count().await, 0);
}

#[tokio::test]
async fn top_up_ceiling_is_configurable() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;
    let cards = app.cards.clone().with_max_top_up(5_000);

    let err = cards
        .top_up(owner.id, issued.id, top_up(5_001, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let response = cards
        .top_up(owner.id, issued.id, top_up(5_000, None))
        .await
        .unwrap();
    assert_eq!(response.fee_cents, 50);
    assert_eq!(response.balance_cents, 4_950);
}

#[tokio::test]
async fn top_up_that_would_overflow_the_balance_is_refused() {
    let app = TestApp::new();
    let (owner, card) = app.funded_card(i64::MAX - 10).await;

    let err = app
        .cards
        .top_up(owner.id, card.id, top_up(1_000, Some("topup-overflow")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert_eq!(app.card(card.id).await.current_balance_cents, i64::MAX - 10);
    assert_eq!(app.store.transaction_count().await, 0);
}

#[tokio::test]
async fn status_changes_follow_the_card_lifecycle() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let card = app
        .cards
        .modify_card_status(owner.id, issued.id, CardAction::Freeze)
        .await
        .unwrap();
    assert_eq!(card.status, CardStatus::Frozen);

    let err = app
        .cards
        .modify_card_status(owner.id, issued.id, CardAction::Freeze)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyInState(_)));

    let card = app
        .cards
        .modify_card_status(owner.id, issued.id, CardAction::Unfreeze)
        .await
        .unwrap();
    assert_eq!(card.status, CardStatus::Active);

    let card = app
        .cards
        .modify_card_status(owner.id, issued.id, CardAction::Terminate)
        .await
        .unwrap();
    assert_eq!(card.status, CardStatus::Terminated);

    let err = app
        .cards
        .modify_card_status(owner.id, issued.id, CardAction::Unfreeze)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CardNotActive));
}

#[tokio::test]
async fn status_change_of_someone_elses_card_is_not_found() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let stranger = app.verified_user().await;
    let issued = app.issue_card(&owner).await;

    let err = app
        .cards
        .modify_card_status(stranger.id, issued.id, CardAction::Freeze)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::CardNotFound));
    assert_eq!(app.card(issued.id).await.status, CardStatus::Active);
}

#[tokio::test]
async fn sweep_expires_due_cards_and_notifies() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let now = Utc::now();

    let due = app.issue_card(&owner).await;
    let mut card = app.card(due.id).await;
    card.expires_at = now - Duration::days(1);
    app.store.put_card(card).await;

    let frozen_due = app.issue_card(&owner).await;
    let mut card = app.card(frozen_due.id).await;
    card.expires_at = now - Duration::days(2);
    card.status = CardStatus::Frozen;
    app.store.put_card(card).await;

    let terminated = app.issue_card(&owner).await;
    let mut card = app.card(terminated.id).await;
    card.expires_at = now - Duration::days(1);
    card.status = CardStatus::Terminated;
    app.store.put_card(card).await;

    let current = app.issue_card(&owner).await;

    let sweeper = ExpirySweeper::new(app.store.clone(), app.dispatcher.clone());
    let expired = sweeper.expire_due_cards(now).await.unwrap();

    assert_eq!(expired.len(), 2);
    assert_eq!(app.card(due.id).await.status, CardStatus::Expired);
    assert_eq!(app.card(frozen_due.id).await.status, CardStatus::Expired);
    assert_eq!(app.card(terminated.id).await.status, CardStatus::Terminated);
    assert_eq!(app.card(current.id).await.status, CardStatus::Active);

    let sent = app.notifier.wait_for(2).await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.kind == NotificationKind::Expired));

    let err = app
        .cards
        .modify_card_status(owner.id, due.id, CardAction::Unfreeze)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CardExpired));
}

#[tokio::test]
async fn notice_targets_cards_expiring_in_three_days() {
    let app = TestApp::new();
    let owner = app.verified_user().await;
    let now = Utc::now();
    let today = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();

    let soon = app.issue_card(&owner).await;
    let mut card = app.card(soon.id).await;
    card.expires_at = today + Duration::days(3) + Duration::hours(12);
    app.store.put_card(card).await;

    let later = app.issue_card(&owner).await;
    let mut card = app.card(later.id).await;
    card.expires_at = today + Duration::days(5);
    app.store.put_card(card).await;

    let sweeper = ExpirySweeper::new(app.store.clone(), app.dispatcher.clone());
    let noticed = sweeper.notify_expiring_soon(now).await.unwrap();

    assert_eq!(noticed.len(), 1);
    assert_eq!(noticed[0].id, soon.id);
    assert_eq!(app.card(soon.id).await.status, CardStatus::Active);

    let sent = app.notifier.wait_for(1).await;
    assert_eq!(sent[0].kind, NotificationKind::Expiring);
    assert_eq!(sent[0].recipient, owner.email);
}

#[tokio::test]
async fn kyc_steps_cannot_be_skipped() {
    let app = TestApp::new();
    let user = app.user_with_kyc(Some(KycStatus::Started)).await;

    let err = app
        .kyc
        .advance(user.id, KycStatus::Verified)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidKycTransition(_)));

    app.kyc
        .advance(user.id, KycStatus::DocumentsUploaded)
        .await
        .unwrap();
    assert_eq!(
        app.kyc.advance(user.id, KycStatus::Verified).await.unwrap(),
        KycStatus::Verified
    );
    assert_eq!(
        app.kyc.status(user.id).await.unwrap(),
        Some(KycStatus::Verified)
    );
}
