use serde::Serialize;

/// Course progress as a whole percentage of completed lessons, clamped to `0..=100`.
pub fn percent(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    let pct = (completed.clamp(0, total) as f64 / total as f64) * 100.0;
    pct.round() as i32
}

pub fn is_valid_progress(p: i32) -> bool {
    (0..=100).contains(&p)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Bucket {
    pub progress_range: &'static str,
    pub student_count: i64,
}

const BUCKETS: [&str; 6] = ["Not started", "1-25%", "26-50%", "51-75%", "76-99%", "Completed"];

fn bucket_of(progress: i32) -> usize {
    match progress {
        i32::MIN..=0 => 0,
        1..=25 => 1,
        26..=50 => 2,
        51..=75 => 3,
        76..=99 => 4,
        _ => 5,
    }
}

/// Groups enrollment progress values into the fixed ranges the course statistics page
/// charts. Empty ranges are omitted; the rest keep ascending order.
pub fn distribution(progress: &[i32]) -> Vec<Bucket> {
    let mut counts = [0i64; 6];
    for p in progress {
        counts[bucket_of(*p)] += 1;
    }
    BUCKETS
        .iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| Bucket {
            progress_range: *label,
            student_count: n,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_linear_and_bounded() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(7, 3), 100);
        assert_eq!(percent(-2, 3), 0);
    }

    #[test]
    fn progress_range_check() {
        assert!(is_valid_progress(0));
        assert!(is_valid_progress(100));
        assert!(!is_valid_progress(-1));
        assert!(!is_valid_progress(101));
    }

    #[test]
    fn distribution_buckets() {
        let d = distribution(&[0, 0, 10, 25, 26, 99, 100]);
        let labels: Vec<_> = d.iter().map(|b| (b.progress_range, b.student_count)).collect();
        assert_eq!(
            labels,
            vec![
                ("Not started", 2),
                ("1-25%", 2),
                ("26-50%", 1),
                ("76-99%", 1),
                ("Completed", 1),
            ]
        );
        assert!(distribution(&[]).is_empty());
    }
}
