//! Bounded random selection without replacement.
use rand::{Rng, seq::SliceRandom};

/// Pick `n` distinct elements of `items` uniformly at random
///
/// * `n <= 0` yields nothing.
/// * `n >= items.len()` yields every element, in the order given.
/// * otherwise the result is a uniformly random `n`-subset, in random order.
///
/// `items` is never reordered; the shuffle runs over a private vector of references, so the cost
/// is linear in `items.len()` while only the `n` chosen elements are cloned.
pub fn sample<T, R>(items: &[T], n: i64, rng: &mut R) -> Vec<T>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let n = match usize::try_from(n) {
        Ok(0) | Err(_) => return Vec::new(),
        Ok(n) => n,
    };
    if n >= items.len() {
        return items.to_vec();
    }

    let mut view: Vec<&T> = items.iter().collect();
    let (chosen, _) = view.partial_shuffle(rng, n);
    chosen.iter().map(|item| (*item).clone()).collect()
}
