#[macro_export]
macro_rules! typed_tree {
    ($e:expr) => {{
        use $crate::tree::tree_parser::from_typed_newick;
        from_typed_newick($e).unwrap().pop().unwrap()
    }};
}

#[macro_export]
macro_rules! skyline {
    ($($value:expr),+ $(,)?) => {{
        $crate::parameters::Skyline::constant(&[$($value),+])
    }};
}
