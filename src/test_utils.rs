use crate::hierarchy::TypeUniverse;

/// A small Java-flavored universe shared by tests:
/// `Object` on top; `Number` with `Integer`/`Double` under it; `String`;
/// and the parametric chain `Collection`/`List`/`ArrayList`/`LinkedList`.
pub fn java_ish_universe() -> TypeUniverse {
    let mut universe = TypeUniverse::new("Object");
    let object = universe.root();

    let number = universe.add_type("Number", 0);
    universe.add_extends(number, object);
    let integer = universe.add_type("Integer", 0);
    universe.add_extends(integer, number);
    let double = universe.add_type("Double", 0);
    universe.add_extends(double, number);
    let string = universe.add_type("String", 0);
    universe.add_extends(string, object);

    let collection = universe.add_type("Collection", 1);
    universe.add_extends(collection, object);
    let list = universe.add_type("List", 1);
    universe.add_extends(list, collection);
    let array_list = universe.add_type("ArrayList", 1);
    universe.add_extends(array_list, list);
    let linked_list = universe.add_type("LinkedList", 1);
    universe.add_extends(linked_list, list);

    universe
}
