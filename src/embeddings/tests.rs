use super::*;

#[test]
fn empty_input_is_rejected() {
    assert!(matches!(prepare_input("", 100), Err(VaultError::EmptyInput)));
    assert!(matches!(
        prepare_input(" \n\t ", 100),
        Err(VaultError::EmptyInput)
    ));
    assert!(!VaultError::EmptyInput.is_retryable());
}

#[test]
fn long_input_is_truncated_consistently() {
    let text = "ä".repeat(50);
    let first = prepare_input(&text, 10).expect("non-empty input");
    let second = prepare_input(&text, 10).expect("non-empty input");

    assert_eq!(first.chars().count(), 10);
    assert_eq!(first, second);
}

#[test]
fn short_input_is_trimmed_only() {
    assert_eq!(
        prepare_input("  ownership and borrowing \n", 100).expect("non-empty input"),
        "ownership and borrowing"
    );
}
