//! Film accumulation properties: running-mean convergence, lock-free add
//! under contention, clear/resize, and pass compositing.

use helios::film::Film;
use helios::util::{UVec2, Vec4};

#[test]
fn test_running_mean_fixed_value_is_a_fixed_point() {
    let mut film = Film::new();
    film.resize(UVec2::new(1, 1), 1);

    let v = Vec4::new(0.25, 1.5, -3.0, 1.0);
    for n in 1..=100u32 {
        film.accumulate(v, UVec2::ZERO, 1.0 / n as f32);
    }
    let stored = film.value_at(0).expect("1x1 film has pixel 0");
    assert!(
        (stored - v).abs().max_element() < 1e-5,
        "repeated estimates of the same value must not drift: {stored:?}"
    );
}

#[test]
fn test_running_mean_converges_to_arithmetic_mean() {
    let mut film = Film::new();
    film.resize(UVec2::new(1, 1), 1);

    let n = 1000u32;
    let mut sum = 0.0f64;
    for i in 1..=n {
        // Deterministic but non-constant sequence of estimates.
        let v = ((i * 7919) % 100) as f32 / 100.0;
        sum += v as f64;
        film.accumulate(Vec4::splat(v), UVec2::ZERO, 1.0 / i as f32);
    }
    let mean = (sum / n as f64) as f32;
    let stored = film.value_at(0).unwrap().x;
    assert!(
        (stored - mean).abs() < 1e-3,
        "running mean {stored} vs arithmetic mean {mean}"
    );
}

#[test]
fn test_atomic_add_loses_no_updates() {
    for threads in [1usize, 4, 16] {
        for adds in [1u32, 1000] {
            let mut film = Film::new();
            film.resize(UVec2::new(1, 1), threads as u32);

            std::thread::scope(|scope| {
                for t in 0..threads {
                    let film = &film;
                    scope.spawn(move || {
                        for _ in 0..adds {
                            film.atomic_add(Vec4::ONE, UVec2::ZERO, t as u32);
                        }
                    });
                }
            });

            let expected = (threads as u32 * adds) as f32;
            let stored = film.value_at(0).unwrap();
            // Integer-valued sums below 2^24 are exact in f32.
            assert_eq!(
                stored,
                Vec4::splat(expected),
                "{threads} threads x {adds} adds"
            );
        }
    }
}

#[test]
fn test_clear_and_resize_leave_zeros() {
    let mut film = Film::new();
    film.resize(UVec2::new(8, 6), 3);
    assert_eq!(film.dimensions(), UVec2::new(8, 6));

    for i in 0..film.count() {
        film.atomic_add(Vec4::ONE, UVec2::new(i as u32 % 8, i as u32 / 8), 0);
    }
    film.clear();
    assert_eq!(film.dimensions(), UVec2::new(8, 6));
    assert!(film.data().iter().all(|v| *v == Vec4::ZERO));

    // Resize also clears, even to the same dimensions.
    film.atomic_add(Vec4::ONE, UVec2::ZERO, 0);
    film.resize(UVec2::new(8, 6), 3);
    assert!(film.data().iter().all(|v| *v == Vec4::ZERO));
}

#[test]
fn test_flush_with_full_weight_copies() {
    let mut a = Film::new();
    let mut b = Film::new();
    a.resize(UVec2::new(4, 4), 1);
    b.resize(UVec2::new(4, 4), 1);

    let x = Vec4::new(0.7, 0.2, 0.9, 1.0);
    for y in 0..4 {
        for xp in 0..4 {
            a.atomic_add(x, UVec2::new(xp, y), 0);
        }
    }

    a.flush_to(&b, 1.0);
    assert_eq!(a.data(), b.data(), "t = 1 must overwrite the target");
}

#[test]
fn test_flush_composites_with_running_mean() {
    let mut a = Film::new();
    let mut b = Film::new();
    a.resize(UVec2::new(2, 2), 1);
    b.resize(UVec2::new(2, 2), 1);

    for y in 0..2 {
        for x in 0..2 {
            a.atomic_add(Vec4::splat(1.0), UVec2::new(x, y), 0);
            b.atomic_add(Vec4::splat(3.0), UVec2::new(x, y), 0);
        }
    }

    // b' = b*(1-t) + a*t with t = 1/2 -> 2.0 everywhere.
    a.flush_to(&b, 0.5);
    assert!(b.data().iter().all(|v| *v == Vec4::splat(2.0)));
    // Source is untouched.
    assert!(a.data().iter().all(|v| *v == Vec4::splat(1.0)));
}

#[test]
fn test_flush_dimension_mismatch_is_a_no_op() {
    let mut a = Film::new();
    let mut b = Film::new();
    a.resize(UVec2::new(2, 2), 1);
    b.resize(UVec2::new(3, 3), 1);
    a.atomic_add(Vec4::ONE, UVec2::ZERO, 0);

    let before = b.version();
    a.flush_to(&b, 1.0);
    assert!(b.data().iter().all(|v| *v == Vec4::ZERO));
    assert_eq!(b.version(), before);
}
