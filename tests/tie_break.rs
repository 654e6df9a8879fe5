use docsync_core::{Position, Replica};

fn exchange(x: &mut Replica, y: &mut Replica) {
    let from_x = x.take_outbox();
    let from_y = y.take_outbox();
    x.receive_batch(from_y);
    y.receive_batch(from_x);
}

#[test]
fn test_concurrent_inserts_at_same_position_order_by_replica() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();

    a.insert_text(&Position::root(0), "A").unwrap();
    b.insert_text(&Position::root(0), "B").unwrap();
    exchange(&mut a, &mut b);

    // Same Lamport time: the higher replica ID goes later.
    assert_eq!(a.text(), "AB");
    assert_eq!(b.text(), "AB");
}

#[test]
fn test_concurrent_runs_do_not_interleave() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();
    a.insert_text(&Position::root(0), "[]").unwrap();
    exchange(&mut a, &mut b);

    a.insert_text(&Position::root(1), "left").unwrap();
    b.insert_text(&Position::root(1), "right").unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.text(), b.text());
    assert!(a.text() == "[leftright]" || a.text() == "[rightleft]");
}

#[test]
fn test_replica_id_breaks_equal_lamport_ties() {
    let mut z = Replica::new("z").unwrap();
    let mut a = Replica::new("a").unwrap();
    z.insert_text(&Position::root(0), "x").unwrap();
    exchange(&mut z, &mut a);

    a.insert_text(&Position::root(0), "1").unwrap();
    z.insert_text(&Position::root(0), "2").unwrap();
    let from_z = z.take_outbox();
    let from_a = a.take_outbox();
    assert_eq!(from_a[0].id.lamport, from_z[0].id.lamport);

    z.receive_batch(from_a);
    a.receive_batch(from_z);
    assert_eq!(z.text(), "12x");
    assert_eq!(a.text(), "12x");
}
