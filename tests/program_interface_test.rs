use solana_sdk::{pubkey::Pubkey, signature::Signature};
use vault_orchestrator::events::{
    decode_logs, render_report, DepositEvent, EventKind, EventRecord, ProgramEvent, SubscriptionId,
    ViewEvent, WithdrawEvent,
};
use vault_orchestrator::program::{anchor_discriminator, AggregatorInstruction};

#[test]
fn test_instruction_data_layout() {
    let data = AggregatorInstruction::Deposit { amount: 100_000_000 }.data();
    assert_eq!(&data[..8], &anchor_discriminator("global", "deposit"));
    assert_eq!(&data[8..], &100_000_000u64.to_le_bytes());

    let data = AggregatorInstruction::UpdateStrategy { allocation_bps: 5_000 }.data();
    assert_eq!(data.len(), 10);
    assert_eq!(
        AggregatorInstruction::decode(&data),
        Some(AggregatorInstruction::UpdateStrategy { allocation_bps: 5_000 })
    );

    assert_eq!(AggregatorInstruction::View.data().len(), 8);
    assert_eq!(AggregatorInstruction::decode(&[0u8; 8]), None);
}

#[test]
fn test_transaction_logs_decode_in_order() {
    let user = Pubkey::new_unique();
    let deposit = ProgramEvent::Deposit(DepositEvent {
        user,
        amount: 5,
        minted_amount: 5,
    });
    let withdraw = ProgramEvent::Withdraw(WithdrawEvent {
        user,
        burned_amount: 5,
        returned_amount: 4,
    });
    let logs = vec![
        "Program GBtJHkAivArkwUsA5HBH2Wv16gMqYQPpRCzH3uRRigKC invoke [1]".to_string(),
        deposit.to_log_line().unwrap(),
        "Program log: Instruction: Deposit".to_string(),
        withdraw.to_log_line().unwrap(),
        "Program data: bm90IGFuIGV2ZW50".to_string(),
    ];

    let (events, errors) = decode_logs(&logs);
    assert!(errors.is_empty());
    assert_eq!(events, vec![deposit, withdraw]);
}

#[test]
fn test_report_lists_every_record() {
    let long_user = Pubkey::new_unique();
    let records: Vec<EventRecord> = (0..3)
        .map(|i| EventRecord {
            sequence: i,
            subscription: SubscriptionId(1),
            event: ProgramEvent::View(ViewEvent {
                user: long_user,
                yield_value: i * 10,
            }),
            slot: 100 + i,
            signature: Signature::new_unique(),
        })
        .collect();

    let report = render_report(&records, 12);
    assert!(report.contains("Captured events: 3"));
    assert_eq!(report.matches(EventKind::View.name()).count(), 3);
    assert!(report.contains("Event #3"));
    assert!(!report.contains(&long_user.to_string()));
}
