//! Wire-compatible event and result records.
//!
//! These types share their binary representation with the Tallygrid protocol
//! and are copied verbatim into request message bodies. All integers are
//! little-endian on the wire; the structs below assume a little-endian host,
//! which the client asserts at startup.

use bitflags::bitflags;

/// A Tallygrid ledger account.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Account {
    pub id: u128,
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
    pub user_data: u128,
    pub timestamp: u64,
    pub ledger: u32,
    pub code: u16,
    pub flags: AccountFlags,
    pub reserved: Reserved<16>,
}

bitflags! {
    /// Flags for the `flags` field of [`Account`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AccountFlags: u16 {
        const LINKED = 1 << 0;
        const DEBITS_MUST_NOT_EXCEED_CREDITS = 1 << 1;
        const CREDITS_MUST_NOT_EXCEED_DEBITS = 1 << 2;
        const HISTORY = 1 << 3;
        const CLOSED = 1 << 4;
    }
}

/// A transfer between two [`Account`]s.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Transfer {
    pub id: u128,
    pub debit_account_id: u128,
    pub credit_account_id: u128,
    pub amount: u128,
    pub pending_id: u128,
    pub user_data: u128,
    pub timestamp: u64,
    pub timeout: u32,
    pub ledger: u32,
    pub code: u16,
    pub flags: TransferFlags,
    pub reserved: Reserved<12>,
}

bitflags! {
    /// Flags for the `flags` field of [`Transfer`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct TransferFlags: u16 {
        const LINKED = 1 << 0;
        const PENDING = 1 << 1;
        const POST_PENDING_TRANSFER = 1 << 2;
        const VOID_PENDING_TRANSFER = 1 << 3;
        const BALANCING_DEBIT = 1 << 4;
        const BALANCING_CREDIT = 1 << 5;
        const CLOSING = 1 << 6;
    }
}

/// Filter event for transfer and balance range queries on one account.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccountFilter {
    pub account_id: u128,
    pub timestamp_min: u64,
    pub timestamp_max: u64,
    pub limit: u32,
    pub flags: AccountFilterFlags,
    pub reserved: Reserved<24>,
}

bitflags! {
    /// Flags for the `flags` field of [`AccountFilter`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AccountFilterFlags: u32 {
        const DEBITS = 1 << 0;
        const CREDITS = 1 << 1;
        const REVERSED = 1 << 2;
    }
}

/// Filter event for account and transfer queries across the ledger.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    pub user_data: u128,
    pub timestamp_min: u64,
    pub timestamp_max: u64,
    pub ledger: u32,
    pub limit: u32,
    pub flags: QueryFilterFlags,
    pub code: u16,
    pub reserved: Reserved<18>,
}

bitflags! {
    /// Flags for the `flags` field of [`QueryFilter`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct QueryFilterFlags: u32 {
        const REVERSED = 1 << 0;
    }
}

/// One historical balance of an account.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccountBalance {
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
    pub timestamp: u64,
    pub reserved: Reserved<56>,
}

/// Wire record for one unsuccessful event of a create request.
///
/// Create replies are sparse: the cluster returns a record only for events
/// that did not succeed, identified by `index` into the request body.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventResult {
    pub index: u32,
    pub result: u32,
}

/// Reserved padding bytes inside wire records.
///
/// Instantiated with [`Default::default`]; applications never need to touch
/// this directly.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reserved<const N: usize>([u8; N]);

impl<const N: usize> Default for Reserved<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> std::fmt::Debug for Reserved<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reserved<{N}>")
    }
}

/// Outcome of a single `create_accounts` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CreateAccountResult {
    Ok,
    LinkedEventFailed,
    IdMustNotBeZero,
    IdMustNotBeIntMax,
    FlagsAreMutuallyExclusive,
    LedgerMustNotBeZero,
    CodeMustNotBeZero,
    ExistsWithDifferentFlags,
    ExistsWithDifferentLedger,
    ExistsWithDifferentCode,
    Exists,
    /// A result code this client version does not know.
    Unknown,
}

impl CreateAccountResult {
    /// Decode a wire result code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::LinkedEventFailed,
            2 => Self::IdMustNotBeZero,
            3 => Self::IdMustNotBeIntMax,
            4 => Self::FlagsAreMutuallyExclusive,
            5 => Self::LedgerMustNotBeZero,
            6 => Self::CodeMustNotBeZero,
            7 => Self::ExistsWithDifferentFlags,
            8 => Self::ExistsWithDifferentLedger,
            9 => Self::ExistsWithDifferentCode,
            10 => Self::Exists,
            _ => Self::Unknown,
        }
    }
}

/// Outcome of a single `create_transfers` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CreateTransferResult {
    Ok,
    LinkedEventFailed,
    IdMustNotBeZero,
    IdMustNotBeIntMax,
    FlagsAreMutuallyExclusive,
    DebitAccountNotFound,
    CreditAccountNotFound,
    AccountsMustBeDifferent,
    AccountsMustHaveTheSameLedger,
    LedgerMustNotBeZero,
    CodeMustNotBeZero,
    PendingTransferNotFound,
    ExceedsCredits,
    ExceedsDebits,
    Exists,
    /// A result code this client version does not know.
    Unknown,
}

impl CreateTransferResult {
    /// Decode a wire result code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::LinkedEventFailed,
            2 => Self::IdMustNotBeZero,
            3 => Self::IdMustNotBeIntMax,
            4 => Self::FlagsAreMutuallyExclusive,
            5 => Self::DebitAccountNotFound,
            6 => Self::CreditAccountNotFound,
            7 => Self::AccountsMustBeDifferent,
            8 => Self::AccountsMustHaveTheSameLedger,
            9 => Self::LedgerMustNotBeZero,
            10 => Self::CodeMustNotBeZero,
            11 => Self::PendingTransferNotFound,
            12 => Self::ExceedsCredits,
            13 => Self::ExceedsDebits,
            14 => Self::Exists,
            _ => Self::Unknown,
        }
    }
}

/// Result of one `create_accounts` event, with its request index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreateAccountsResult {
    /// Index of the event within the submitted slice.
    pub index: usize,
    pub result: CreateAccountResult,
}

/// Result of one `create_transfers` event, with its request index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreateTransfersResult {
    /// Index of the event within the submitted slice.
    pub index: usize,
    pub result: CreateTransferResult,
}

/// View a slice of wire records as raw bytes.
pub(crate) fn as_bytes<T: Copy>(records: &[T]) -> &[u8] {
    // Safety: T is a plain-old-data wire record with no padding requirements
    // on reads; the byte view covers exactly the slice's memory.
    unsafe { std::slice::from_raw_parts(records.as_ptr().cast::<u8>(), std::mem::size_of_val(records)) }
}

/// Copy a reply body into typed wire records.
///
/// Returns `None` when the body length is not a whole number of records.
/// The copy tolerates arbitrary alignment of `bytes`.
pub(crate) fn decode_records<T: Copy>(bytes: &[u8]) -> Option<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return None;
    }
    let count = bytes.len() / size;
    let mut records = Vec::<T>::with_capacity(count);
    // Safety: T is a plain-old-data wire record valid for any bit pattern,
    // and the reserved capacity covers exactly `bytes.len()` bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), records.as_mut_ptr().cast::<u8>(), bytes.len());
        records.set_len(count);
    }
    Some(records)
}

const _: () = {
    assert!(std::mem::size_of::<Account>() == 128);
    assert!(std::mem::size_of::<Transfer>() == 128);
    assert!(std::mem::size_of::<AccountFilter>() == 64);
    assert!(std::mem::size_of::<QueryFilter>() == 64);
    assert!(std::mem::size_of::<AccountBalance>() == 128);
    assert!(std::mem::size_of::<EventResult>() == 8);
};
