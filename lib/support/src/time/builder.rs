#[macro_export]
macro_rules! t {
    (now) => {{ $crate::time::now() }};

    ($hour:literal : $minute:literal) => {{
        chrono::NaiveTime::from_hms_opt($hour, $minute, 0).unwrap()
    }};

    ($amount:literal seconds) => {{ chrono::Duration::seconds($amount) }};
    ($amount:literal minutes) => {{ chrono::Duration::minutes($amount) }};
    ($amount:literal hours) => {{ chrono::Duration::hours($amount) }};

    ($amount:literal seconds ago) => {{ $crate::time::now() - $crate::t!($amount seconds) }};
    ($amount:literal minutes ago) => {{ $crate::time::now() - $crate::t!($amount minutes) }};
    ($amount:literal hours ago) => {{ $crate::time::now() - $crate::t!($amount hours) }};
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    #[test]
    fn time_of_day() {
        let time = t!(5:34);

        assert_eq!(time.hour(), 5);
        assert_eq!(time.minute(), 34);
    }

    #[test]
    fn durations() {
        assert_eq!(t!(10 seconds).num_seconds(), 10);
        assert_eq!(t!(10 minutes).num_minutes(), 10);
        assert_eq!(t!(10 hours).num_hours(), 10);
    }

    #[test]
    fn instants_in_the_past() {
        let now = crate::time::now();
        let dt = t!(10 minutes ago);

        assert!(now >= dt);
        assert!(now - chrono::Duration::minutes(10) <= dt);
    }
}
