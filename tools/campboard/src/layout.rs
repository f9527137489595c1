/// Widest row used once the curated table runs out.
pub const FALLBACK_ROW_WIDTH: usize = 5;

/// Hand-tuned row splits for 1..=18 cards, indexed by `count - 1`.
const DISTRIBUTION_TABLE: [&[usize]; 18] = [
    &[1],
    &[2],
    &[3],
    &[4],
    &[3, 2],
    &[3, 3],
    &[3, 4],
    &[4, 4],
    &[5, 4],
    &[3, 3, 4],
    &[3, 4, 4],
    &[4, 4, 4],
    &[4, 5, 4],
    &[5, 5, 4],
    &[5, 5, 5],
    &[4, 4, 4, 4],
    &[4, 4, 5, 4],
    &[4, 5, 5, 4],
];

pub fn curated_distribution(item_count: usize) -> Option<&'static [usize]> {
    item_count
        .checked_sub(1)
        .and_then(|idx| DISTRIBUTION_TABLE.get(idx))
        .copied()
}

/// Full rows of `width` followed by one shorter row for any remainder.
pub fn pack_rows(item_count: usize, width: usize) -> Vec<usize> {
    let width = width.max(1);
    let mut rows = vec![width; item_count / width];
    let remainder = item_count % width;
    if remainder > 0 {
        rows.push(remainder);
    }
    rows
}

/// Cards per row for `item_count` cards.
pub fn distribute(item_count: usize) -> Vec<usize> {
    match curated_distribution(item_count) {
        Some(rows) => rows.to_vec(),
        None => pack_rows(item_count, FALLBACK_ROW_WIDTH),
    }
}

/// Splits `items` into consecutive rows following `distribution`.
pub fn group_rows<'a, T>(items: &'a [T], distribution: &[usize]) -> Vec<&'a [T]> {
    let mut rows = Vec::with_capacity(distribution.len());
    let mut rest = items;
    for &size in distribution {
        if rest.is_empty() {
            break;
        }
        let (row, tail) = rest.split_at(size.min(rest.len()));
        rows.push(row);
        rest = tail;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::{distribute, group_rows, pack_rows};

    #[test]
    fn curated_examples_match() {
        assert_eq!(distribute(5), vec![3, 2]);
        assert_eq!(distribute(9), vec![5, 4]);
        assert_eq!(distribute(13), vec![4, 5, 4]);
        assert_eq!(distribute(16), vec![4, 4, 4, 4]);
        assert_eq!(distribute(18), vec![4, 5, 5, 4]);
    }

    #[test]
    fn large_and_empty_counts_fall_back_to_rows_of_five() {
        assert_eq!(distribute(0), Vec::<usize>::new());
        assert_eq!(distribute(19), vec![5, 5, 5, 4]);
        assert_eq!(distribute(20), vec![5, 5, 5, 5]);
        assert_eq!(distribute(23), vec![5, 5, 5, 5, 3]);
    }

    #[test]
    fn every_distribution_sums_to_its_count_with_non_empty_rows() {
        for count in 0..=60 {
            let rows = distribute(count);
            assert_eq!(rows.iter().sum::<usize>(), count, "count {count}");
            assert!(rows.iter().all(|&size| size >= 1), "count {count}");
            assert_eq!(rows, distribute(count));
        }
    }

    #[test]
    fn pack_rows_treats_zero_width_as_one() {
        assert_eq!(pack_rows(2, 0), vec![1, 1]);
    }

    #[test]
    fn group_rows_preserves_order() {
        let items = (1..=7).collect::<Vec<_>>();
        let rows = group_rows(&items, &distribute(items.len()));
        assert_eq!(rows, vec![&[1, 2, 3][..], &[4, 5, 6, 7][..]]);
    }
}
