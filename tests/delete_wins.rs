use docsync_core::crdt::NodeType;
use docsync_core::{ParentRef, Position, Replica, TextRange};

fn exchange(x: &mut Replica, y: &mut Replica) {
    let from_x = x.take_outbox();
    let from_y = y.take_outbox();
    x.receive_batch(from_y);
    y.receive_batch(from_x);
}

#[test]
fn test_insert_inside_concurrently_deleted_range_survives() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();
    a.insert_text(&Position::root(0), "Hello").unwrap();
    exchange(&mut a, &mut b);

    a.delete_range(&TextRange::new(ParentRef::Root, 1, 4)).unwrap();
    b.insert_text(&Position::root(2), "X").unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.text(), "HXo");
    assert_eq!(b.text(), "HXo");
}

#[test]
fn test_concurrent_deletes_of_same_unit() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();
    a.insert_text(&Position::root(0), "abc").unwrap();
    exchange(&mut a, &mut b);

    a.delete_range(&TextRange::new(ParentRef::Root, 1, 2)).unwrap();
    b.delete_range(&TextRange::new(ParentRef::Root, 0, 2)).unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.text(), "c");
    assert_eq!(b.text(), "c");
}

#[test]
fn test_children_of_deleted_node_are_reattached() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();
    let p = a.insert_paragraph(&Position::root(0)).unwrap();
    let inner = ParentRef::Node(p.clone());
    a.insert_text(&Position::new(inner.clone(), 0), "abc").unwrap();
    exchange(&mut a, &mut b);

    a.delete_node(&p).unwrap();
    b.insert_text(&Position::new(inner.clone(), 1), "Z").unwrap();
    exchange(&mut a, &mut b);

    // The paragraph and the content A saw are gone; B's concurrent insert
    // takes the paragraph's place.
    assert_eq!(a.text(), "Z");
    assert_eq!(a.snapshot(), b.snapshot());
    assert_eq!(a.children_len(&ParentRef::Root), 1);
}

#[test]
fn test_deleted_list_lifts_new_item() {
    let mut a = Replica::new("a").unwrap();
    let mut b = Replica::new("b").unwrap();
    let p = a.insert_paragraph(&Position::root(0)).unwrap();
    a.insert_text(&Position::new(ParentRef::Node(p), 0), "one").unwrap();
    a.toggle_list(&TextRange::new(ParentRef::Root, 0, 1), NodeType::BulletList)
        .unwrap();
    let list = a.child_ids(&ParentRef::Root)[0].clone();
    exchange(&mut a, &mut b);

    a.delete_node(&list).unwrap();
    let item = b
        .insert_node(
            &Position::new(ParentRef::Node(list.clone()), 1),
            NodeType::ListItem,
            Default::default(),
        )
        .unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.snapshot(), b.snapshot());
    assert_eq!(a.node_type(&item), Some(NodeType::ListItem));
    assert_eq!(a.child_ids(&ParentRef::Root), vec![item]);
}
