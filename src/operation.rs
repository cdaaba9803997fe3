//! The closed set of request operations and their per-operation shape.

use crate::types::{Account, AccountBalance, AccountFilter, EventResult, QueryFilter, Transfer};

/// A request variant understood by the cluster.
///
/// Code `0` is reserved for the registration handshake and is never a valid
/// packet operation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAccounts = 1,
    CreateTransfers = 2,
    LookupAccounts = 3,
    LookupTransfers = 4,
    GetAccountTransfers = 5,
    GetAccountBalances = 6,
    QueryAccounts = 7,
    QueryTransfers = 8,
}

/// How a batched reply maps back onto the request's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyLayout {
    /// Exactly one result record per event, in event order.
    PerEvent,
    /// Sparse [`EventResult`] records, ascending by event index.
    SparseIndexed,
    /// The whole reply belongs to the single packet; never batched.
    Whole,
}

/// Static shape of one operation, resolved at compile time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OperationShape {
    pub event_size: u32,
    pub result_size: u32,
    pub batching_allowed: bool,
    pub reply: ReplyLayout,
}

const fn size_u32<T>() -> u32 {
    std::mem::size_of::<T>() as u32
}

impl Operation {
    /// Decode an operation from its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::CreateAccounts),
            2 => Some(Self::CreateTransfers),
            3 => Some(Self::LookupAccounts),
            4 => Some(Self::LookupTransfers),
            5 => Some(Self::GetAccountTransfers),
            6 => Some(Self::GetAccountBalances),
            7 => Some(Self::QueryAccounts),
            8 => Some(Self::QueryTransfers),
            _ => None,
        }
    }

    /// The wire code of this operation.
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub(crate) const fn shape(self) -> OperationShape {
        match self {
            Self::CreateAccounts => OperationShape {
                event_size: size_u32::<Account>(),
                result_size: size_u32::<EventResult>(),
                batching_allowed: true,
                reply: ReplyLayout::SparseIndexed,
            },
            Self::CreateTransfers => OperationShape {
                event_size: size_u32::<Transfer>(),
                result_size: size_u32::<EventResult>(),
                batching_allowed: true,
                reply: ReplyLayout::SparseIndexed,
            },
            Self::LookupAccounts => OperationShape {
                event_size: size_u32::<u128>(),
                result_size: size_u32::<Account>(),
                batching_allowed: true,
                reply: ReplyLayout::PerEvent,
            },
            Self::LookupTransfers => OperationShape {
                event_size: size_u32::<u128>(),
                result_size: size_u32::<Transfer>(),
                batching_allowed: true,
                reply: ReplyLayout::PerEvent,
            },
            Self::GetAccountTransfers => OperationShape {
                event_size: size_u32::<AccountFilter>(),
                result_size: size_u32::<Transfer>(),
                batching_allowed: false,
                reply: ReplyLayout::Whole,
            },
            Self::GetAccountBalances => OperationShape {
                event_size: size_u32::<AccountFilter>(),
                result_size: size_u32::<AccountBalance>(),
                batching_allowed: false,
                reply: ReplyLayout::Whole,
            },
            Self::QueryAccounts => OperationShape {
                event_size: size_u32::<QueryFilter>(),
                result_size: size_u32::<Account>(),
                batching_allowed: false,
                reply: ReplyLayout::Whole,
            },
            Self::QueryTransfers => OperationShape {
                event_size: size_u32::<QueryFilter>(),
                result_size: size_u32::<Transfer>(),
                batching_allowed: false,
                reply: ReplyLayout::Whole,
            },
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateAccounts => f.write_str("create_accounts"),
            Self::CreateTransfers => f.write_str("create_transfers"),
            Self::LookupAccounts => f.write_str("lookup_accounts"),
            Self::LookupTransfers => f.write_str("lookup_transfers"),
            Self::GetAccountTransfers => f.write_str("get_account_transfers"),
            Self::GetAccountBalances => f.write_str("get_account_balances"),
            Self::QueryAccounts => f.write_str("query_accounts"),
            Self::QueryTransfers => f.write_str("query_transfers"),
        }
    }
}
