use crate::model::Year;

pub const MAX_EMPLOYEES: usize = 10_000;
pub const MAX_SERVICES: usize = 10_000;
pub const MAX_DAYS_PER_SERVICE: usize = 1_500;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_SHIFT_CODE_LEN: usize = 16;
pub const MAX_REASON_LEN: usize = 1_024;

pub const MIN_YEAR: Year = 1970;
pub const MAX_YEAR: Year = 9_999;
