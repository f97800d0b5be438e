use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Public holidays of one country. Weekends are handled by the caller.
pub trait HolidayCalendar: Send + Sync {
    fn country(&self) -> &'static str;

    fn holiday_name(&self, date: NaiveDate) -> Option<&'static str>;

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holiday_name(date).is_some()
    }
}

/// Republic of Ireland bank holidays.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrishHolidays;

impl HolidayCalendar for IrishHolidays {
    fn country(&self) -> &'static str {
        "IE"
    }

    fn holiday_name(&self, date: NaiveDate) -> Option<&'static str> {
        let year = date.year();
        let fixed = match (date.month(), date.day()) {
            (1, 1) => Some("New Year's Day"),
            (3, 17) => Some("Saint Patrick's Day"),
            (12, 25) => Some("Christmas Day"),
            (12, 26) => Some("Saint Stephen's Day"),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        if year == 2022 && date.month() == 3 && date.day() == 18 {
            return Some("Day of Remembrance and Recognition");
        }
        if year >= 2023 && Some(date) == st_brigids_day(year) {
            return Some("Saint Brigid's Day");
        }
        if easter_sunday(year).and_then(|d| d.checked_add_days(Days::new(1))) == Some(date) {
            return Some("Easter Monday");
        }

        let first_monday = |month| nth_weekday(year, month, Weekday::Mon, 1);
        if Some(date) == first_monday(5) {
            return Some("May Day");
        }
        if Some(date) == first_monday(6) {
            return Some("June Bank Holiday");
        }
        if Some(date) == first_monday(8) {
            return Some("August Bank Holiday");
        }
        if Some(date) == last_weekday(year, 10, Weekday::Mon) {
            return Some("October Bank Holiday");
        }
        None
    }
}

/// Calendar with no holidays, used for unknown countries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHolidays;

impl HolidayCalendar for NoHolidays {
    fn country(&self) -> &'static str {
        ""
    }

    fn holiday_name(&self, _date: NaiveDate) -> Option<&'static str> {
        None
    }
}

pub fn calendar_for(country: &str) -> &'static dyn HolidayCalendar {
    static IE: IrishHolidays = IrishHolidays;
    static NONE: NoHolidays = NoHolidays;
    match country.to_ascii_uppercase().as_str() {
        "IE" | "IRL" | "IRELAND" => &IE,
        _ => &NONE,
    }
}

/// First Monday of February, or 1 February when that falls on a Friday.
fn st_brigids_day(year: i32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, 2, 1)?;
    if first.weekday() == Weekday::Fri {
        Some(first)
    } else {
        nth_weekday(year, 2, Weekday::Mon, 1)
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    nth_weekday(year, month, weekday, 5).or_else(|| nth_weekday(year, month, weekday, 4))
}

/// Anonymous Gregorian computus.
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn easter() {
        assert_eq!(easter_sunday(2024), Some(date(2024, 3, 31)));
        assert_eq!(easter_sunday(2025), Some(date(2025, 4, 20)));
        assert_eq!(easter_sunday(2000), Some(date(2000, 4, 23)));
    }

    #[test]
    fn irish_calendar_2024() {
        let ie = IrishHolidays;
        for (m, d) in [(1, 1), (2, 5), (3, 17), (4, 1), (5, 6), (6, 3), (8, 5), (10, 28), (12, 25), (12, 26)] {
            assert!(ie.is_holiday(date(2024, m, d)), "2024-{}-{} should be a holiday", m, d);
        }
        assert!(!ie.is_holiday(date(2024, 2, 1)));
        assert!(!ie.is_holiday(date(2024, 10, 21)));
    }

    #[test]
    fn st_brigid_on_friday_and_before_2023() {
        // 1 Feb 2030 is a Friday
        assert!(IrishHolidays.is_holiday(date(2030, 2, 1)));
        assert!(!IrishHolidays.is_holiday(date(2030, 2, 4)));
        assert!(!IrishHolidays.is_holiday(date(2022, 2, 7)));
    }

    #[test]
    fn unknown_country_has_no_holidays() {
        assert_eq!(calendar_for("ie").country(), "IE");
        assert!(!calendar_for("XX").is_holiday(date(2024, 12, 25)));
    }
}
