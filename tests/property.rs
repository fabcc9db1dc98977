mod property {
    mod extract;
    mod template;
}
